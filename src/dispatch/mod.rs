//! Client-initiated operations: sending, token registration, status updates,
//! listings and group management.

mod facade;
mod requests;
mod response;

pub use facade::{DispatchFacade, FacadeSettings, ValidationError, DEFAULT_LIMIT, DEFAULT_PAGE, MAX_LIMIT};
pub use requests::*;
pub use response::{ApiResponse, Pagination};
