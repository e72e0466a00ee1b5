// BusLab - Serial Bus & Pipeline Simulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod frame;
pub mod i2c;
pub mod spi;

pub use frame::{Ack, Frame, FrameAssembler};

use std::thread;
use std::time::Duration;

/// Run the peripheral role on its own thread and the controller role on the
/// caller's thread, joining both before returning.
///
/// The controller starts one `head_start` after the peripheral is spawned so
/// the peripheral is already waiting for the start condition.
pub fn run_transaction<P, C, RP, RC>(head_start: Duration, peripheral: P, controller: C) -> (RP, RC)
where
    P: FnOnce() -> RP + Send,
    RP: Send,
    C: FnOnce() -> RC,
{
    thread::scope(|s| {
        let handle = s.spawn(peripheral);
        thread::sleep(head_start);
        let controller_result = controller();
        let peripheral_result = match handle.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        };
        (peripheral_result, controller_result)
    })
}
