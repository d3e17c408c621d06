//! Local persistence of a profile. [settings_store] keeps the user's configuration,
//! [history] keeps a record of every successful run.

pub mod entities;
pub mod history;
pub mod profile;
pub mod settings_store;
