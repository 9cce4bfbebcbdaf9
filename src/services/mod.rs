pub mod backfill;
pub mod history_import;
pub mod reconcile;
