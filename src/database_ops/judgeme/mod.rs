pub mod provider;

pub use provider::JudgemeAdapter;
