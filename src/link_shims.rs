//! Runtime symbol providers for third-party crates.
//!
//! `async-io-mini` timers resolve `_embassy_time_*` at link time and
//! `embassy-sync` needs a `critical-section` implementation. On device
//! both are backed by ESP-IDF primitives; on the host the timer driver
//! is backed by `std` (the critical-section impl comes from the
//! `critical-section/std` dev-dependency).

#[cfg(target_os = "espidf")]
use core::cell::{Cell, RefCell};
use core::time::Duration;
#[cfg(target_os = "espidf")]
use std::sync::{Mutex, MutexGuard};

// ── ESP-IDF: critical-section 1.x ─────────────────────────────

#[cfg(target_os = "espidf")]
static CRITICAL_SECTION_MUTEX: Mutex<()> = Mutex::new(());

#[cfg(target_os = "espidf")]
thread_local! {
    static CRITICAL_SECTION_DEPTH: Cell<u8> = const { Cell::new(0) };
    static CRITICAL_SECTION_GUARD: RefCell<Option<MutexGuard<'static, ()>>> = const { RefCell::new(None) };
}

/// Runtime-backed critical-section acquire used by `critical-section` 1.x.
#[cfg(target_os = "espidf")]
#[unsafe(no_mangle)]
pub extern "C" fn _critical_section_1_0_acquire() -> u8 {
    CRITICAL_SECTION_DEPTH.with(|depth| {
        CRITICAL_SECTION_GUARD.with(|guard| {
            let d = depth.get();
            if d == 0 {
                let lock = CRITICAL_SECTION_MUTEX
                    .lock()
                    .expect("critical-section mutex poisoned");
                *guard.borrow_mut() = Some(lock);
            }
            let new_depth = d.saturating_add(1);
            depth.set(new_depth);
            new_depth
        })
    })
}

/// Runtime-backed critical-section release used by `critical-section` 1.x.
#[cfg(target_os = "espidf")]
#[unsafe(no_mangle)]
pub extern "C" fn _critical_section_1_0_release(_token: u8) {
    CRITICAL_SECTION_DEPTH.with(|depth| {
        CRITICAL_SECTION_GUARD.with(|guard| {
            let d = depth.get();
            if d == 0 {
                return;
            }
            let new_depth = d - 1;
            depth.set(new_depth);
            if new_depth == 0 {
                *guard.borrow_mut() = None;
            }
        })
    })
}

// ── Timer driver: monotonic microseconds ──────────────────────

#[cfg(target_os = "espidf")]
#[unsafe(no_mangle)]
pub extern "C" fn _embassy_time_now() -> u64 {
    unsafe { esp_idf_svc::sys::esp_timer_get_time() as u64 }
}

#[cfg(not(target_os = "espidf"))]
#[unsafe(no_mangle)]
pub extern "C" fn _embassy_time_now() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_micros() as u64
}

/// Runtime-backed wake scheduler for async timers.
#[unsafe(no_mangle)]
pub extern "C" fn _embassy_time_schedule_wake(at: u64, waker: *mut core::ffi::c_void) {
    if waker.is_null() {
        return;
    }

    // SAFETY: the caller passes a valid pointer to a `Waker` for the
    // duration of schedule registration. We clone it immediately and
    // move the clone.
    let waker = unsafe { (&*(waker as *const core::task::Waker)).clone() };
    std::thread::spawn(move || {
        let now = _embassy_time_now();
        if at > now {
            std::thread::sleep(Duration::from_micros(at - now));
        }
        waker.wake();
    });
}
