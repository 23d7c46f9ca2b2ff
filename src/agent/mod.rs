pub mod artist;
pub mod engine;
pub mod places;
pub mod tools;
