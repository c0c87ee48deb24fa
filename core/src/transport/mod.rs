// Transport module: BLE link

pub mod ble;
