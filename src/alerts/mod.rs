pub mod evaluator;

pub use evaluator::{AlertEngine, Direction, EvaluationOutcome, PriceMovement, TickReport, run_alert_loop};
