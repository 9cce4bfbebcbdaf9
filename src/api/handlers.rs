use crate::api::ApiState;
use crate::models::rate::EventKind;
use crate::store::RateQuery;
use crate::util;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{json, Value};
use std::sync::Arc;

/// Compact timestamp for "no rates matched", year one.
const EMPTY_MAX_IMPORT_DATE: &str = "00010101000000";

fn error_body(code: i64, message: &str) -> Json<Value> {
    Json(json!({ "error_code": code, "error_message": message }))
}

/// GET /
pub async fn index() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, error_body(1, "No action specified."))
}

/// GET /info/
pub async fn info() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({ "version": env!("CARGO_PKG_VERSION") })),
    )
}

/// GET /currencies/
pub async fn currencies(State(state): State<Arc<ApiState>>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({ "currencies": state.config.known_currency_codes() })),
    )
}

/// GET /rates/
pub async fn rates_index() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, error_body(2, "No currency specified."))
}

/// GET /rates/:currency_code/
pub async fn rates(
    State(state): State<Arc<ApiState>>,
    Path(currency_code): Path<String>,
) -> (StatusCode, Json<Value>) {
    currency_rates_response(&state, &currency_code, None, None, None)
}

/// GET /rates/:currency_code/:import_date/
pub async fn rates_after(
    State(state): State<Arc<ApiState>>,
    Path((currency_code, import_date)): Path<(String, String)>,
) -> (StatusCode, Json<Value>) {
    let import_date = match parse_date_segment(&import_date) {
        Ok(value) => value,
        Err(response) => return response,
    };
    currency_rates_response(&state, &currency_code, Some(import_date), None, None)
}

/// GET /rates/:currency_code/:import_date/:start_date/
pub async fn rates_from(
    State(state): State<Arc<ApiState>>,
    Path((currency_code, import_date, start_date)): Path<(String, String, String)>,
) -> (StatusCode, Json<Value>) {
    let (import_date, start_date) =
        match (parse_date_segment(&import_date), parse_date_segment(&start_date)) {
            (Ok(import_date), Ok(start_date)) => (import_date, start_date),
            (Err(response), _) | (_, Err(response)) => return response,
        };
    currency_rates_response(
        &state,
        &currency_code,
        Some(import_date),
        Some(start_date.date()),
        None,
    )
}

/// GET /rates/:currency_code/:import_date/:start_date/:end_date/
pub async fn rates_between(
    State(state): State<Arc<ApiState>>,
    Path((currency_code, import_date, start_date, end_date)): Path<(
        String,
        String,
        String,
        String,
    )>,
) -> (StatusCode, Json<Value>) {
    let parsed = (
        parse_date_segment(&import_date),
        parse_date_segment(&start_date),
        parse_date_segment(&end_date),
    );
    let (import_date, start_date, end_date) = match parsed {
        (Ok(import_date), Ok(start_date), Ok(end_date)) => (import_date, start_date, end_date),
        (Err(response), _, _) | (_, Err(response), _) | (_, _, Err(response)) => return response,
    };
    currency_rates_response(
        &state,
        &currency_code,
        Some(import_date),
        Some(start_date.date()),
        Some(end_date.date()),
    )
}

/// GET /heartbeat/
///
/// Answers 200 with an empty warning list while both import kinds have run
/// recently and every known currency received an update since the last
/// weekday. Anything amiss downgrades the status to 500 and lists warnings.
pub async fn heartbeat(State(state): State<Arc<ApiState>>) -> (StatusCode, Json<Value>) {
    let now = util::now_local();
    let mut warnings: Vec<String> = Vec::new();

    let (current_event_date, current_ttl) = loading_heartbeat(
        &state,
        EventKind::CurrentRatesLoading,
        state.config.heartbeat_current_rates_loading_event_lifespan,
        "current",
        now,
        &mut warnings,
    );

    let (with_rates, without_rates) = updating_heartbeat(&state, now, &mut warnings);

    let (historical_event_date, historical_ttl) = loading_heartbeat(
        &state,
        EventKind::HistoricalRatesLoading,
        state.config.heartbeat_historical_rates_loading_event_lifespan,
        "historical",
        now,
        &mut warnings,
    );

    let status = if warnings.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    let body = json!({
        "warnings": warnings,
        "last_current_rates_loading_event_date": current_event_date,
        "last_current_rates_loading_event_ttl": current_ttl,
        "currencies_with_current_rates": with_rates,
        "currencies_without_current_rates": without_rates,
        "last_historical_rates_loading_event_date": historical_event_date,
        "last_historical_rates_loading_event_ttl": historical_ttl,
    });

    (status, Json(body))
}

fn parse_date_segment(value: &str) -> Result<NaiveDateTime, (StatusCode, Json<Value>)> {
    util::parse_compact_datetime(value).map_err(|_| {
        (
            StatusCode::OK,
            error_body(3, &format!("Unable to parse a date: {}", value)),
        )
    })
}

fn currency_rates_response(
    state: &ApiState,
    currency_code: &str,
    imported_after: Option<NaiveDateTime>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> (StatusCode, Json<Value>) {
    let currency_code = currency_code.to_uppercase();

    if !state
        .config
        .known_currency_codes()
        .iter()
        .any(|code| code == &currency_code)
    {
        return (
            StatusCode::OK,
            error_body(
                4,
                &format!(
                    "Exchange rates for the currency code \"{}\" cannot be found at UAE CB.",
                    currency_code
                ),
            ),
        );
    }

    let query = RateQuery {
        as_of: None,
        imported_after,
        start_date,
        end_date,
    };

    let rates = match state.store.currency_rates(&currency_code, &query) {
        Ok(rates) => rates,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body(5, &format!("Unable to query the rate store: {}", e)),
            )
        }
    };

    let max_import_date = rates
        .iter()
        .map(|rate| rate.import_date)
        .max()
        .map(util::compact_datetime)
        .unwrap_or_else(|| EMPTY_MAX_IMPORT_DATE.to_string());

    let rates: Vec<Value> = rates
        .iter()
        .map(|rate| {
            json!({
                "currency_code": rate.currency_code,
                "rate_date": util::compact_date(rate.rate_date),
                "rate": rate.rate,
                "import_date": util::compact_datetime(rate.import_date),
            })
        })
        .collect();

    (
        StatusCode::OK,
        Json(json!({ "rates": rates, "max_import_date": max_import_date })),
    )
}

fn loading_heartbeat(
    state: &ApiState,
    kind: EventKind,
    lifespan: i64,
    title: &str,
    now: NaiveDateTime,
    warnings: &mut Vec<String>,
) -> (Option<String>, Option<i64>) {
    let last_event = match state.store.last_event(kind) {
        Ok(last_event) => last_event,
        Err(e) => {
            warnings.push(format!("Unable to read the event log: {}", e));
            return (None, None);
        }
    };

    match last_event {
        Some(event_date) => {
            let ttl = lifespan - (now - event_date).num_seconds();
            if ttl < 0 {
                warnings.push(format!(
                    "The last {} rates loading triggered over {} seconds ago.",
                    title, lifespan
                ));
            }
            (
                Some(event_date.format("%Y-%m-%dT%H:%M:%S").to_string()),
                Some(ttl),
            )
        }
        None => {
            warnings.push(format!(
                "It is impossible to determine when the last {} rates loading has happened.",
                title
            ));
            (None, None)
        }
    }
}

// Every known currency must have received a current-rate update since the
// last weekday; weekends do not count against the source.
fn updating_heartbeat(
    state: &ApiState,
    now: NaiveDateTime,
    warnings: &mut Vec<String>,
) -> (Vec<String>, Vec<String>) {
    let since_date = util::last_weekday(now.date());
    let since = since_date.and_time(NaiveTime::MIN);

    let mut with_rates = Vec::new();
    let mut without_rates = Vec::new();

    for code in state.config.known_currency_codes() {
        let updated = state
            .store
            .rate_updated_since(EventKind::CurrentRatesUpdating, &code, since)
            .unwrap_or(false);
        if updated {
            with_rates.push(code);
        } else {
            without_rates.push(code);
        }
    }

    if !without_rates.is_empty() {
        warnings.push(format!(
            "At least one currency did not receive current rate update from {}.",
            since_date.format("%Y-%m-%d")
        ));
    }

    (with_rates, without_rates)
}
