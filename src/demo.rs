//! The built-in demo prompt used by the `demo` subcommand.

pub const DEMO_TASK: &str = "\
Add a short CONTRIBUTING.md at the repository root describing how to run \
the test suite, and separately add a one-line usage example to the top of \
README.md. Keep both changes minimal and independent of each other.";
