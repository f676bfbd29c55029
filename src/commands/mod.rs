// Reconciliation
pub mod apply;
pub mod plan;
pub mod validate;

// Inspection
pub mod output;
pub mod state;
