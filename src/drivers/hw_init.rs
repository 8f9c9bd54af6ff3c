//! Flow-input bring-up: GPIO edge interrupt + periodic window timer.
//!
//! The ISR does one atomic increment; the `esp_timer` callback performs
//! the single-word window handoff. Both run outside the cooperative
//! executor, so they must stay O(1) — see `sensors::flow`.

use esp_idf_hal::gpio::{AnyIOPin, Input, InterruptType, PinDriver, Pull};
use esp_idf_svc::sys::*;
use log::{error, info};

use crate::sensors::flow::{flow_edge_isr, flow_window_roll};

/// Configure the flow pulse pin for rising-edge interrupts. The
/// returned driver must be kept alive for the lifetime of the program
/// or the subscription is dropped.
pub fn attach_flow_input(pin: AnyIOPin) -> anyhow::Result<PinDriver<'static, AnyIOPin, Input>> {
    let mut driver = PinDriver::input(pin)?;
    driver.set_pull(Pull::Up)?;
    driver.set_interrupt_type(InterruptType::PosEdge)?;
    // SAFETY: the callback is a plain fn doing one atomic increment.
    unsafe {
        driver.subscribe(flow_edge_isr)?;
    }
    driver.enable_interrupt()?;
    info!("hw_init: flow edge interrupt attached");
    Ok(driver)
}

static mut WINDOW_TIMER: esp_timer_handle_t = core::ptr::null_mut();

unsafe extern "C" fn window_tick_cb(_arg: *mut core::ffi::c_void) {
    flow_window_roll();
}

/// Start the periodic flow-window rollover timer.
pub fn start_flow_window_timer(window_ms: u32) {
    // SAFETY: WINDOW_TIMER is written once here from the main task
    // before the callback can fire; the callback itself only performs
    // the atomic window swap.
    unsafe {
        let args = esp_timer_create_args_t {
            callback: Some(window_tick_cb),
            arg: core::ptr::null_mut(),
            dispatch_method: esp_timer_dispatch_t_ESP_TIMER_TASK,
            name: c"flow_window".as_ptr(),
            skip_unhandled_events: false,
        };
        let ret = esp_timer_create(&args, &raw mut WINDOW_TIMER);
        if ret != ESP_OK {
            error!("hw_init: window timer create failed (rc={ret}) — flow rate unavailable");
            return;
        }
        let ret = esp_timer_start_periodic(WINDOW_TIMER, u64::from(window_ms) * 1_000);
        if ret != ESP_OK {
            error!("hw_init: window timer start failed (rc={ret})");
            return;
        }
    }
    info!("hw_init: flow window timer started ({window_ms} ms)");
}
