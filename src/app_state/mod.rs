/// Application state management for the UART bridge
mod app_state;
mod device_table;

pub use app_state::AppState;
pub use device_table::{
    DeviceTable, ReaderGuard, ReaderState, ReaderStatus, SlotStatus, StopFlag,
};
