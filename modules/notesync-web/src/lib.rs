pub mod driver;
pub mod extract;
pub mod infer;
pub mod paths;
pub mod source;

pub use driver::{BrowserDriver, DriverResponse, HttpDriver, PageDriver, PreparedRequest};
pub use infer::infer;
pub use source::{PageStream, WebSource};
