pub mod messages;
pub mod rating;
