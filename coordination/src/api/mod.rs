//! Boundary API: HTTP/JSON binding of the engine
//!
//! | Method | Path                        | Operation                  |
//! |--------|-----------------------------|----------------------------|
//! | POST   | `/coordinate`               | route one agent report     |
//! | GET    | `/consensus?work_item_id=`  | consensus snapshot         |
//! | GET    | `/health`                   | engine health              |
//! | POST   | `/agents/register`          | register an agent          |
//! | POST   | `/agents/deregister`        | deregister an agent        |
//! | POST   | `/work-items`               | enqueue a work item        |
//! | POST   | `/work-items/:id/cancel`    | cancel a work item         |
//! | GET    | `/traces?from=&to=&limit=`  | trace range or most recent |
//! | GET    | `/traces/:work_item_id`     | one trace                  |

pub mod error;
pub mod handlers;
pub mod routes;
pub mod types;

pub use error::{ApiError, ErrorBody};
pub use routes::{create_router, AppState};
