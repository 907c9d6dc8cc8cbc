pub mod request_meta;
pub mod response;

pub use request_meta::RequestMeta;
pub use response::{ApiResponse, ApiResult};
