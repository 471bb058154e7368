pub mod judgeme;
pub mod propagate;
pub mod summary_store;
