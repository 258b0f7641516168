/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 */

mod machine;
mod room_connection;

pub use room_connection::{RoomConnection, RoomOptions, RoomState, DEFAULT_JOIN_TIMEOUT};
