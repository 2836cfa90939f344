use std::mem::ManuallyDrop;
use std::num::NonZeroI32;

use crate::error::{BluetoothStatusCode, NativeError};

pub struct ScopeGuard<F: FnOnce()> {
    dropfn: ManuallyDrop<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn defuse(mut self) {
        unsafe { ManuallyDrop::drop(&mut self.dropfn) }
        std::mem::forget(self)
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        // SAFETY: This is OK because `dropfn` is `ManuallyDrop` which will not be dropped by the compiler.
        let dropfn = unsafe { ManuallyDrop::take(&mut self.dropfn) };
        dropfn();
    }
}

pub fn defer<F: FnOnce()>(dropfn: F) -> ScopeGuard<F> {
    ScopeGuard {
        dropfn: ManuallyDrop::new(dropfn),
    }
}

pub(crate) trait BoolExt {
    fn non_false(self) -> Result<(), crate::Error>;
}

impl BoolExt for bool {
    #[track_caller]
    fn non_false(self) -> Result<(), crate::Error> {
        self.then_some(())
            .ok_or_else(|| NativeError::CallReturnedFalse.into())
    }
}

pub(crate) trait IntExt {
    fn check_status_code(self) -> Result<(), crate::Error>;
}

impl IntExt for i32 {
    #[track_caller]
    fn check_status_code(self) -> Result<(), crate::Error> {
        let Some(code) = NonZeroI32::new(self) else {
            return Ok(());
        };
        Err(NativeError::BluetoothStatusCode(BluetoothStatusCode::from(code)).into())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn defer_runs_on_drop_unless_defused() {
        let hits = Cell::new(0);
        {
            let _guard = defer(|| hits.set(hits.get() + 1));
        }
        assert_eq!(hits.get(), 1);
        defer(|| hits.set(hits.get() + 1)).defuse();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn native_return_conventions() {
        assert!(true.non_false().is_ok());
        assert_eq!(false.non_false().unwrap_err().kind(), ErrorKind::Internal);
        assert!(0.check_status_code().is_ok());
        assert_eq!(
            1.check_status_code().unwrap_err().kind(),
            ErrorKind::BluetoothIsTurnedOff
        );
    }
}
