mod board;
mod drawing_surface;
mod message;
mod raster;
mod session_log;
mod stroke;
mod tracker;
mod tracking;
mod tracking_store;
mod types;

pub use board::*;
pub use drawing_surface::*;
pub use message::*;
pub use raster::*;
pub use session_log::*;
pub use stroke::{Stroke, Tool};
pub use tracker::*;
pub use tracking::*;
pub use tracking_store::*;
pub use types::*;

pub extern crate bincode;
pub extern crate chrono;
pub extern crate euclid;
pub extern crate serde;
pub extern crate serde_json;
pub extern crate uuid;
