//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements       | Connects to                        |
//! |------------|------------------|------------------------------------|
//! | `log_sink` | EventSink        | Serial log output                  |
//! | `nvs`      | StoragePort      | ESP-IDF NVS / in-memory map (host) |
//! |            | CredentialStore  | postcard blob in the `prov` space  |
//! | `time`     | (clock)          | ESP32 system timer / `Instant`     |
//!
//! The BLE GATT server and the WiFi station are application-specific; they
//! implement `TransportPort` and `NetworkPort` and post their callbacks
//! through an [`IngressHandle`](crate::events::IngressHandle).

pub mod log_sink;
pub mod nvs;
pub mod time;
