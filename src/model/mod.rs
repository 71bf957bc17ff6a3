//! Value types: feed entries and the channels that hold them.

mod channel;
mod entry;

pub(crate) use channel::{read as read_channel, write as write_channel};
pub use channel::{Channel, SharedChannel};
pub use entry::{Entry, ImageData, PUB_DATE_FORMAT, UNKNOWN_PUB_DATE};
