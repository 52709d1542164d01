//! Mock inference endpoints and canned extraction fixtures

mod fixtures;
mod inference;

pub use fixtures::{default_fixtures, Fixture};
pub use inference::{hashed_embedding, MockInference, MOCK_DIMENSIONS};
