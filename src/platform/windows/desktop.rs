use anyhow::Context;
use tracing::trace;
use windows::Win32::Foundation::{BOOL, E_ACCESSDENIED};
use windows::Win32::System::StationsAndDesktops::{
    CloseDesktop, DESKTOP_CONTROL_FLAGS, DESKTOP_SWITCHDESKTOP, OpenInputDesktop, SetThreadDesktop,
};

use crate::error::{GrabError, GrabResult};

/// Binds the calling thread to the desktop currently receiving input.
///
/// The binding persists for the thread's lifetime, so only the reallocation
/// worker calls this.
pub(crate) fn switch_to_input_desktop() -> GrabResult<()> {
    let opened = unsafe {
        OpenInputDesktop(DESKTOP_CONTROL_FLAGS(0), BOOL::from(true), DESKTOP_SWITCHDESKTOP)
    };
    let desktop = match opened {
        Ok(desktop) => desktop,
        Err(e) if e.code() == E_ACCESSDENIED => return Err(GrabError::AccessDenied),
        Err(e) => {
            return Err(GrabError::Platform(
                anyhow::Error::from(e).context("OpenInputDesktop failed"),
            ));
        }
    };

    let switched = unsafe { SetThreadDesktop(desktop) }.context("SetThreadDesktop failed");
    if let Err(err) = unsafe { CloseDesktop(desktop) } {
        trace!(error = %err, "CloseDesktop failed");
    }
    switched.map_err(GrabError::Platform)
}
