pub mod bounded;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod response;
