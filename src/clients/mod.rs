pub mod requester;
pub mod token;
pub mod verifier;
