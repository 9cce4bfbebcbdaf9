use crate::errors::Result;
use crate::models::rate::{CurrencyRate, EventKind, RateChange, ScrapedRate};
use crate::store::RateStore;
use crate::util;
use chrono::{NaiveDate, NaiveDateTime};
use log::debug;

/// Decides which scraped rates are genuinely new and appends them to the
/// store. Everything a run accepts is stamped with the run's import date.
pub struct Reconciler<'a> {
    store: &'a RateStore,
    import_date: NaiveDateTime,
    reference_date: NaiveDate,
    event_kind: EventKind,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        store: &'a RateStore,
        import_date: NaiveDateTime,
        reference_date: NaiveDate,
        event_kind: EventKind,
    ) -> Self {
        Self {
            store,
            import_date,
            reference_date,
            event_kind,
        }
    }

    /// Process one scraped batch. A rate equal to an already-stored version
    /// of the same (currency, rate date) is skipped; anything else is
    /// appended and reported as a change record.
    pub fn reconcile(&self, batch: &[ScrapedRate]) -> Result<Vec<RateChange>> {
        debug!("Processing obtained rates...");

        let mut changes = Vec::new();

        for scraped in batch {
            let presentation = format!(
                "{} on {} is {}",
                scraped.currency_code,
                scraped.rate_date.format("%d-%m-%Y"),
                util::rate_presentation(scraped.rate)
            );

            if self
                .store
                .rate_exists(&scraped.currency_code, scraped.rate_date, scraped.rate)?
            {
                debug!("{}: skipped (already imported)", presentation);
                continue;
            }

            // The prior value has to be read before the insert below.
            let previous = match self
                .store
                .current_value(&scraped.currency_code, scraped.rate_date)?
            {
                value if value == 0.0 => None,
                value => Some(value),
            };

            let change = RateChange {
                currency_code: scraped.currency_code.clone(),
                rate_date: scraped.rate_date,
                previous,
                rate: scraped.rate,
                retroactive: scraped.rate_date < self.reference_date,
            };

            self.store.insert_rate(&CurrencyRate {
                currency_code: scraped.currency_code.clone(),
                rate_date: scraped.rate_date,
                rate: scraped.rate,
                import_date: self.import_date,
            })?;

            self.store
                .record_rate_update(self.event_kind, self.import_date, &change)?;

            debug!("{}: imported", presentation);
            changes.push(change);
        }

        debug!("Obtained rates have been processed.");
        Ok(changes)
    }
}

/// Accumulates changes and warnings across one import run and renders the
/// operator-facing messages.
pub struct ImportReport {
    title: String,
    started_at: NaiveDateTime,
    changes: Vec<RateChange>,
}

impl ImportReport {
    pub fn new(title: &str, started_at: NaiveDateTime) -> Self {
        Self {
            title: title.to_string(),
            started_at,
            changes: Vec::new(),
        }
    }

    pub fn record_changes(&mut self, changes: Vec<RateChange>) {
        self.changes.extend(changes);
    }

    pub fn changed_count(&self) -> usize {
        self.changes.iter().filter(|c| c.is_changed()).count()
    }

    pub fn retroactive_count(&self) -> usize {
        self.changes.iter().filter(|c| c.retroactive).count()
    }

    pub fn started_message(&self) -> String {
        format!(
            "{} started at {} ({}).",
            capitalize(&self.title),
            util::time_presentation(self.started_at),
            util::compact_datetime(self.started_at)
        )
    }

    pub fn completed_message(&self) -> String {
        format!(
            "{} started at {} is completed. Number of changed rates: {}. Number of retroactive rates: {}.",
            capitalize(&self.title),
            util::time_presentation(self.started_at),
            self.changed_count(),
            self.retroactive_count()
        )
    }

    pub fn failed_message(&self) -> String {
        format!(
            "{} started at {} ({}) is failed.",
            capitalize(&self.title),
            util::time_presentation(self.started_at),
            util::compact_datetime(self.started_at)
        )
    }

    /// Per-date summary of everything the run appended, or None when the
    /// store already knew it all.
    pub fn summary(&self) -> Option<String> {
        if self.changes.is_empty() {
            return None;
        }

        let mut dates: Vec<NaiveDate> = self.changes.iter().map(|c| c.rate_date).collect();
        dates.sort();
        dates.dedup();

        let mut sections = Vec::new();
        for date in dates {
            let lines: Vec<String> = self
                .changes
                .iter()
                .filter(|c| c.rate_date == date)
                .map(RateChange::presentation)
                .collect();

            sections.push(format!(
                "Summary of changed rates on {}:\n{}",
                date.format("%Y-%m-%d"),
                lines.join("\n")
            ));
        }

        Some(sections.join("\n"))
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
