pub mod request_id;
pub mod telemetry;

pub use request_id::{request_id_middleware, RequestId, REQUEST_ID_HEADER};
pub use telemetry::{telemetry_middleware, InFlightRequest, RequestContext, ResponseRecorder};
