use heapless::Vec;
use log::info;

use super::{Channel, RegistrationError, SensorDescriptor, SensorId, SensorKind};
use crate::config::{ANALOG_PINS, DIGITAL_PINS, MAX_SENSORS, ONE_WIRE_PIN, RESERVED_PINS};

/// Bounded set of sensors attached to the probe.
///
/// Descriptors are kept in registration order, which is also the order in
/// which they are sampled and reported. Bus temperature sensors are numbered in
/// the order they are registered; that number is the position of the device in
/// a bus search, so register them in increasing ROM code order.
#[derive(Debug, Default)]
pub struct SensorRegistry<const N: usize = MAX_SENSORS> {
    sensors: Vec<SensorDescriptor, N>,
    bus_devices: u8,
}

impl<const N: usize> SensorRegistry<N> {
    pub const fn new() -> Self {
        Self {
            sensors: Vec::new(),
            bus_devices: 0,
        }
    }

    /// Register a sensor using the numeric kind codes of the configuration
    /// format (1 analog, 2 digital, 3 bus temperature).
    pub fn register_raw(
        &mut self,
        id: &str,
        pin: u8,
        kind: u8,
    ) -> Result<&SensorDescriptor, RegistrationError> {
        self.check_slot(pin)?;
        let kind = SensorKind::try_from(kind)?;
        self.register(id, pin, kind)
    }

    /// Validate and register a sensor on `pin`.
    pub fn register(
        &mut self,
        id: &str,
        pin: u8,
        kind: SensorKind,
    ) -> Result<&SensorDescriptor, RegistrationError> {
        self.check_slot(pin)?;

        let is_bus_pin = pin == ONE_WIRE_PIN;
        if is_bus_pin != (kind == SensorKind::BusTemperature) {
            return Err(RegistrationError::ChannelKindMismatch { pin, kind });
        }

        let channel = match kind {
            SensorKind::Analog if !ANALOG_PINS.contains(&pin) => {
                return Err(RegistrationError::InvalidAnalogPin(pin));
            }
            SensorKind::Digital if !DIGITAL_PINS.contains(&pin) => {
                return Err(RegistrationError::InvalidDigitalPin(pin));
            }
            SensorKind::Analog | SensorKind::Digital => Channel::Pin(pin),
            SensorKind::BusTemperature => Channel::Bus {
                slot: self.bus_devices,
            },
        };

        let id = validate_id(id)?;
        if self.get_by_id(&id).is_some() {
            return Err(RegistrationError::DuplicateId);
        }

        let descriptor = SensorDescriptor { id, channel, kind };
        self.sensors
            .push(descriptor)
            .map_err(|_| RegistrationError::CapacityExceeded)?;
        if kind == SensorKind::BusTemperature {
            self.bus_devices += 1;
        }

        let index = self.sensors.len() - 1;
        let added = &self.sensors[index];
        info!(" + {} on {}", added.id, added.channel.pin());
        Ok(added)
    }

    /// Checks that do not depend on the sensor kind.
    fn check_slot(&self, pin: u8) -> Result<(), RegistrationError> {
        if RESERVED_PINS.contains(&pin) {
            return Err(RegistrationError::ReservedChannel(pin));
        }
        if self.sensors.is_full() {
            return Err(RegistrationError::CapacityExceeded);
        }
        Ok(())
    }

    pub fn get(&self, slot: usize) -> Option<&SensorDescriptor> {
        self.sensors.get(slot)
    }

    pub fn get_by_id(&self, id: &str) -> Option<&SensorDescriptor> {
        self.sensors.iter().find(|s| s.id.as_str() == id)
    }

    /// Channel of the sensor named `id`.
    pub fn channel_for(&self, id: &str) -> Option<Channel> {
        self.get_by_id(id).map(|s| s.channel)
    }

    /// Bus enumeration slot of the bus sensor named `id`.
    pub fn bus_slot_for(&self, id: &str) -> Option<u8> {
        match self.channel_for(id)? {
            Channel::Bus { slot } => Some(slot),
            Channel::Pin(_) => None,
        }
    }

    /// Sensors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &SensorDescriptor> {
        self.sensors.iter()
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

/// Ids are written verbatim into the sync request, so they must not need escaping.
fn validate_id(id: &str) -> Result<SensorId, RegistrationError> {
    let safe = !id.is_empty()
        && id
            .chars()
            .all(|c| !c.is_control() && c != '"' && c != '\\');
    if !safe {
        return Err(RegistrationError::InvalidId);
    }

    let mut owned = SensorId::new();
    owned
        .push_str(id)
        .map_err(|_| RegistrationError::InvalidId)?;
    Ok(owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::OperatorCode;

    #[test]
    fn test_register_assigns_channels_by_kind() {
        let mut registry = SensorRegistry::<5>::new();

        let light = registry.register("pho0", 14, SensorKind::Analog).unwrap();
        assert_eq!(light.channel, Channel::Pin(14));

        let door = registry.register("door", 2, SensorKind::Digital).unwrap();
        assert_eq!(door.channel, Channel::Pin(2));

        let tmp0 = registry
            .register("tmp0", ONE_WIRE_PIN, SensorKind::BusTemperature)
            .unwrap();
        assert_eq!(tmp0.channel, Channel::Bus { slot: 0 });

        let tmp1 = registry
            .register("tmp1", ONE_WIRE_PIN, SensorKind::BusTemperature)
            .unwrap();
        assert_eq!(tmp1.channel, Channel::Bus { slot: 1 });

        assert_eq!(registry.len(), 4);
        assert_eq!(registry.bus_slot_for("tmp1"), Some(1));
        assert_eq!(registry.bus_slot_for("pho0"), None);
        assert_eq!(registry.channel_for("door"), Some(Channel::Pin(2)));
        assert_eq!(registry.channel_for("nope"), None);

        let order: heapless::Vec<&str, 5> = registry.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(order.as_slice(), &["pho0", "door", "tmp0", "tmp1"]);
    }

    #[test]
    fn test_reserved_pins_rejected_for_every_kind() {
        let mut registry = SensorRegistry::<5>::new();
        for pin in RESERVED_PINS {
            for kind in [
                SensorKind::Analog,
                SensorKind::Digital,
                SensorKind::BusTemperature,
            ] {
                assert_eq!(
                    registry.register("x", pin, kind),
                    Err(RegistrationError::ReservedChannel(pin))
                );
            }
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_capacity_exceeded_on_extra_sensor() {
        let mut registry = SensorRegistry::<5>::new();
        let ids = ["a", "b", "c", "d", "e"];
        for (pin, id) in ids.iter().enumerate() {
            registry.register(id, pin as u8, SensorKind::Digital).unwrap();
        }
        assert_eq!(
            registry.register("f", 5, SensorKind::Digital),
            Err(RegistrationError::CapacityExceeded)
        );
        // Reserved pin check still wins over capacity
        assert_eq!(
            registry.register("f", 7, SensorKind::Digital),
            Err(RegistrationError::ReservedChannel(7))
        );
    }

    #[test]
    fn test_bus_pin_and_kind_must_agree() {
        let mut registry = SensorRegistry::<5>::new();
        assert_eq!(
            registry.register("x", ONE_WIRE_PIN, SensorKind::Digital),
            Err(RegistrationError::ChannelKindMismatch {
                pin: ONE_WIRE_PIN,
                kind: SensorKind::Digital
            })
        );
        assert_eq!(
            registry.register("x", ONE_WIRE_PIN, SensorKind::Analog),
            Err(RegistrationError::ChannelKindMismatch {
                pin: ONE_WIRE_PIN,
                kind: SensorKind::Analog
            })
        );
        assert_eq!(
            registry.register("x", 3, SensorKind::BusTemperature),
            Err(RegistrationError::ChannelKindMismatch {
                pin: 3,
                kind: SensorKind::BusTemperature
            })
        );
    }

    #[test]
    fn test_pin_must_match_kind() {
        let mut registry = SensorRegistry::<5>::new();
        assert_eq!(
            registry.register("x", 3, SensorKind::Analog),
            Err(RegistrationError::InvalidAnalogPin(3))
        );
        assert_eq!(
            registry.register("x", 15, SensorKind::Digital),
            Err(RegistrationError::InvalidDigitalPin(15))
        );
    }

    #[test]
    fn test_raw_kind_codes() {
        let mut registry = SensorRegistry::<5>::new();
        assert_eq!(
            registry.register_raw("x", 3, 9),
            Err(RegistrationError::UnknownKind(9))
        );
        let added = registry.register_raw("soil", 14, 1).unwrap();
        assert_eq!(added.kind, SensorKind::Analog);
        // A reserved pin is reported before the kind is looked at
        assert_eq!(
            registry.register_raw("x", 10, 9),
            Err(RegistrationError::ReservedChannel(10))
        );
    }

    #[test]
    fn test_ids_are_unique_and_safe() {
        let mut registry = SensorRegistry::<5>::new();
        registry.register("tmp0", 2, SensorKind::Digital).unwrap();
        assert_eq!(
            registry.register("tmp0", 3, SensorKind::Digital),
            Err(RegistrationError::DuplicateId)
        );
        assert_eq!(
            registry.register("", 3, SensorKind::Digital),
            Err(RegistrationError::InvalidId)
        );
        assert_eq!(
            registry.register("a\"b", 3, SensorKind::Digital),
            Err(RegistrationError::InvalidId)
        );
        assert_eq!(
            registry.register("this-id-is-far-too-long", 3, SensorKind::Digital),
            Err(RegistrationError::InvalidId)
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_failed_bus_registration_does_not_consume_a_slot() {
        let mut registry = SensorRegistry::<5>::new();
        registry
            .register("tmp0", ONE_WIRE_PIN, SensorKind::BusTemperature)
            .unwrap();
        assert_eq!(
            registry.register("tmp0", ONE_WIRE_PIN, SensorKind::BusTemperature),
            Err(RegistrationError::DuplicateId)
        );
        let next = registry
            .register("tmp1", ONE_WIRE_PIN, SensorKind::BusTemperature)
            .unwrap();
        assert_eq!(next.channel, Channel::Bus { slot: 1 });
    }

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = [
            RegistrationError::ReservedChannel(7),
            RegistrationError::CapacityExceeded,
            RegistrationError::ChannelKindMismatch {
                pin: 9,
                kind: SensorKind::Analog,
            },
            RegistrationError::UnknownKind(0),
            RegistrationError::DuplicateId,
            RegistrationError::InvalidId,
            RegistrationError::InvalidAnalogPin(0),
            RegistrationError::InvalidDigitalPin(0),
            RegistrationError::RegistryLocked,
        ];
        let codes: heapless::Vec<u16, 9> = errors.iter().map(|e| e.code()).collect();
        for (i, code) in codes.iter().enumerate() {
            assert!(!codes[i + 1..].contains(code), "code {code} is reused");
        }
        assert_eq!(RegistrationError::ReservedChannel(7).code(), 100);
        assert_eq!(RegistrationError::InvalidDigitalPin(0).code(), 111);
    }
}
