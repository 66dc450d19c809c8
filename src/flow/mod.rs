pub mod generate;
pub mod parse;
pub mod reconcile;

pub use generate::{generate_flow, generate_session_flow, APP_ID_PLACEHOLDER};
pub use parse::{parse_flow, ParsedFlow};
pub use reconcile::reconcile;
