//! Application wiring

mod state;

pub use state::AppState;

#[cfg(test)]
pub(crate) use state::tests::test_state;
