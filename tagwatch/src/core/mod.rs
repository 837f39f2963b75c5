/*!
Core tracking modules for zone presence and absence alerting
*/

pub mod config;
pub mod events;
pub mod registry;
pub mod scan_feed;
pub mod sinks;
pub mod timers;
pub mod tracker;
