//! In-memory ACDB and SPF stand-ins for running the S1-S6 scenarios as
//! ordinary `cargo test` integration tests.

mod fixture_acdb;
mod mock_spf;

pub use fixture_acdb::FixtureAcdb;
pub use mock_spf::MockSpf;
