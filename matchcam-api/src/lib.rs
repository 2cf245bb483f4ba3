// matchcam-api - HTTP surface of the match camera server

pub mod http;

pub use http::{create_router, AppError, AppResult, AppState};
