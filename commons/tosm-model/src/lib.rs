mod event;
mod filtered;
mod meta;
mod result;
mod value;

pub use event::CdcAction;
pub use event::ChangeEvent;
pub use filtered::FilteredMessage;
pub use meta::MessageMeta;
pub use meta::{
    TS_CDC_RECEIVED, TS_DONE, TS_END_PREFIX, TS_OFFSET, TS_READ_PREFIX,
    TS_RECV_PREFIX, TS_SEND_PREFIX, TS_START_PREFIX,
};
pub use result::ResultEntry;
pub use result::ResultLevel;
pub use value::FieldDelta;
pub use value::FieldValue;
