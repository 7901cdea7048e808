// Typed endpoint methods on `EmsClient`, one file per resource family.

mod analytics;
mod assets;
mod databases;
mod query;
mod systems;
