//! Checks that must pass before the radio is touched.

use crate::error::ErrorKind;
use crate::types::{AdapterState, PlatformState, Purpose};
use crate::Result;

/// Validates a platform snapshot for a connect or scan attempt.
///
/// Checks run in a fixed order and the first failure wins: BLE capability, location
/// permission, adapter power, then (for scanning only) the location service.
pub fn check_preconditions(state: &PlatformState, purpose: Purpose) -> Result<()> {
    if !state.ble_supported {
        return Err(ErrorKind::DeviceDoesNotSupportBluetooth.into());
    }
    if !state.location_permission_granted {
        return Err(ErrorKind::NeedLocationPermission.into());
    }
    if state.adapter != AdapterState::On {
        return Err(ErrorKind::BluetoothIsTurnedOff.into());
    }
    if purpose == Purpose::Scan
        && state.location_service_required
        && !state.location_service_enabled
    {
        return Err(ErrorKind::LocationServiceDisabled.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(state: &PlatformState, purpose: Purpose) -> Option<ErrorKind> {
        check_preconditions(state, purpose).err().map(|e| e.kind())
    }

    #[test]
    fn ready_platform_passes() {
        let state = PlatformState::default();
        assert_eq!(kind(&state, Purpose::Connect), None);
        assert_eq!(kind(&state, Purpose::Scan), None);
    }

    #[test]
    fn permission_is_checked_before_adapter_power() {
        let state = PlatformState {
            location_permission_granted: false,
            adapter: AdapterState::Off,
            ..Default::default()
        };
        assert_eq!(
            kind(&state, Purpose::Connect),
            Some(ErrorKind::NeedLocationPermission)
        );
    }

    #[test]
    fn unsupported_platform_wins_over_everything() {
        let state = PlatformState {
            ble_supported: false,
            location_permission_granted: false,
            adapter: AdapterState::Off,
            ..Default::default()
        };
        assert_eq!(
            kind(&state, Purpose::Scan),
            Some(ErrorKind::DeviceDoesNotSupportBluetooth)
        );
    }

    #[test]
    fn adapter_in_transition_counts_as_off() {
        for adapter in [AdapterState::Off, AdapterState::TurningOn, AdapterState::TurningOff] {
            let state = PlatformState {
                adapter,
                ..Default::default()
            };
            assert_eq!(
                kind(&state, Purpose::Connect),
                Some(ErrorKind::BluetoothIsTurnedOff)
            );
        }
    }

    #[test]
    fn location_service_only_matters_for_scanning() {
        let state = PlatformState {
            location_service_required: true,
            location_service_enabled: false,
            ..Default::default()
        };
        assert_eq!(kind(&state, Purpose::Connect), None);
        assert_eq!(
            kind(&state, Purpose::Scan),
            Some(ErrorKind::LocationServiceDisabled)
        );

        let not_required = PlatformState {
            location_service_required: false,
            ..state
        };
        assert_eq!(kind(&not_required, Purpose::Scan), None);
    }
}
