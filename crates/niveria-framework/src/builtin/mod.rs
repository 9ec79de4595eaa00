//! Providers shipped with the framework.

mod profile;

pub use profile::{BUILTIN_PROFILE_PROVIDER, BuiltinProfiles, DefaultProfileFn};
