//! Control messages exchanged between the supercomponent and its modules
//!
//! Every message is an ordinary structured value wrapped in a container with
//! its own data type id. Modules are addressed by name.

use serde::{Deserialize, Serialize};
use wirecodec::{Codec, Container, DataType, DecodeError, DecodeResult, FieldValue, TimeStamp, WireKind, structured};

use crate::config::ManagedLevel;

/// Lifecycle state a module reports about itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleState {
    #[default]
    NotRunning,
    Running,
}

impl FieldValue for ModuleState {
    const KIND: WireKind = WireKind::U8;

    fn encode_value(&self, out: &mut Vec<u8>) {
        let raw: u8 = match self {
            Self::NotRunning => 0,
            Self::Running => 1,
        };
        raw.encode_value(out);
    }

    fn decode_value(bytes: &[u8]) -> DecodeResult<Self> {
        match u8::decode_value(bytes)? {
            0 => Ok(Self::NotRunning),
            1 => Ok(Self::Running),
            other => Err(DecodeError::InvalidValue {
                what: "ModuleState",
                value: other.into(),
            }),
        }
    }
}

/// Why a module stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitCode {
    #[default]
    Okay,
    ExceptionCaught,
    SeriousError,
    ConnectionLost,
    NoSupercomponent,
}

impl FieldValue for ExitCode {
    const KIND: WireKind = WireKind::U8;

    fn encode_value(&self, out: &mut Vec<u8>) {
        (*self as u8).encode_value(out);
    }

    fn decode_value(bytes: &[u8]) -> DecodeResult<Self> {
        Ok(match u8::decode_value(bytes)? {
            0 => Self::Okay,
            1 => Self::ExceptionCaught,
            2 => Self::SeriousError,
            3 => Self::ConnectionLost,
            4 => Self::NoSupercomponent,
            other => {
                return Err(DecodeError::InvalidValue {
                    what: "ExitCode",
                    value: other.into(),
                });
            }
        })
    }
}

impl FieldValue for ManagedLevel {
    const KIND: WireKind = WireKind::U8;

    fn encode_value(&self, out: &mut Vec<u8>) {
        let raw: u8 = match self {
            Self::NotManaged => 0,
            Self::PulseShift => 1,
            Self::PulseTimeAck => 2,
        };
        raw.encode_value(out);
    }

    fn decode_value(bytes: &[u8]) -> DecodeResult<Self> {
        match u8::decode_value(bytes)? {
            0 => Ok(Self::NotManaged),
            1 => Ok(Self::PulseShift),
            2 => Ok(Self::PulseTimeAck),
            other => Err(DecodeError::InvalidValue {
                what: "ManagedLevel",
                value: other.into(),
            }),
        }
    }
}

structured! {
    /// First message a module sends after joining the conference
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct ModuleAnnouncement("ModuleAnnouncement") {
        pub module: String => "module",
        pub pid: u32 => "pid",
        pub frequency: f64 => "frequency",
    }
}

structured! {
    /// Supercomponent's answer to an announcement
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct ModuleConfiguration("ModuleConfiguration") {
        pub module: String => "module",
        pub managed_level: ManagedLevel => "managedLevel",
        pub cid: u32 => "cid",
    }
}

structured! {
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct ModuleStateReport("ModuleStateReport") {
        pub module: String => "module",
        pub state: ModuleState => "state",
        pub exit_code: Option<ExitCode> => "exitCode",
    }
}

structured! {
    /// Permission for one module to run one cycle
    ///
    /// `timestamp` is supercomponent real time plus the module's shift.
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct Pulse("Pulse") {
        pub cycle: u64 => "cycle",
        pub timestamp: TimeStamp => "timestamp",
        pub module: String => "module",
    }
}

structured! {
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct PulseAck("PulseAck") {
        pub cycle: u64 => "cycle",
        pub module: String => "module",
    }
}

structured! {
    /// Request to stop; an empty module name addresses everyone
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct ModuleStop("ModuleStop") {
        pub module: String => "module",
    }
}

impl ModuleStop {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn addresses(&self, module: &str) -> bool {
        self.module.is_empty() || self.module == module
    }
}

impl DataType for ModuleAnnouncement {
    const ID: u32 = 1;
}

impl DataType for ModuleConfiguration {
    const ID: u32 = 2;
}

impl DataType for ModuleStateReport {
    const ID: u32 = 3;
}

impl DataType for Pulse {
    const ID: u32 = 4;
}

impl DataType for PulseAck {
    const ID: u32 = 5;
}

impl DataType for ModuleStop {
    const ID: u32 = 6;
}

/// Any control message, decoded from a container
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Announcement(ModuleAnnouncement),
    Configuration(ModuleConfiguration),
    State(ModuleStateReport),
    Pulse(Pulse),
    Ack(PulseAck),
    Stop(ModuleStop),
}

impl ControlMessage {
    /// Decode a container as a control message
    ///
    /// Returns `Ok(None)` for application data, which is not ours to interpret.
    pub fn decode(container: &Container, codec: &Codec) -> DecodeResult<Option<Self>> {
        let message = match container.data_type() {
            ModuleAnnouncement::ID => Self::Announcement(container.unpack(codec)?),
            ModuleConfiguration::ID => Self::Configuration(container.unpack(codec)?),
            ModuleStateReport::ID => Self::State(container.unpack(codec)?),
            Pulse::ID => Self::Pulse(container.unpack(codec)?),
            PulseAck::ID => Self::Ack(container.unpack(codec)?),
            ModuleStop::ID => Self::Stop(container.unpack(codec)?),
            _ => return Ok(None),
        };
        Ok(Some(message))
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Announcement(_) => "announcement",
            Self::Configuration(_) => "configuration",
            Self::State(_) => "state",
            Self::Pulse(_) => "pulse",
            Self::Ack(_) => "ack",
            Self::Stop(_) => "stop",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wirecodec::{FieldWriter, field_id};

    #[test]
    fn test_control_roundtrip() {
        let codec = Codec::default();
        let sent = TimeStamp::from_micros(1_000);
        let pulse = Pulse {
            cycle: 7,
            timestamp: sent.saturating_add(std::time::Duration::from_micros(10_000)),
            module: "player".into(),
        };
        let container = codec.pack(&pulse, sent).unwrap();
        assert_eq!(ControlMessage::decode(&container, &codec).unwrap(), Some(ControlMessage::Pulse(pulse)));
    }

    #[test]
    fn test_state_report_optional_exit_code() {
        let codec = Codec::default();
        let running = ModuleStateReport {
            module: "player".into(),
            state: ModuleState::Running,
            exit_code: None,
        };
        let bytes = codec.encode(&running).unwrap();
        assert_eq!(codec.decode::<ModuleStateReport>(&bytes).unwrap(), running);

        let done = ModuleStateReport {
            module: "player".into(),
            state: ModuleState::NotRunning,
            exit_code: Some(ExitCode::SeriousError),
        };
        let bytes = codec.encode(&done).unwrap();
        assert_eq!(codec.decode::<ModuleStateReport>(&bytes).unwrap(), done);
    }

    #[test]
    fn test_invalid_discriminant() {
        let mut w = FieldWriter::new();
        w.write(field_id("module"), &"player".to_string());
        w.write(field_id("state"), &9u8);
        let bytes = w.into_envelope();
        assert_eq!(
            Codec::default().decode::<ModuleStateReport>(&bytes).unwrap_err(),
            DecodeError::InvalidValue {
                what: "ModuleState",
                value: 9
            }
        );
    }

    #[test]
    fn test_managed_level_on_wire() {
        let codec = Codec::default();
        for level in [ManagedLevel::NotManaged, ManagedLevel::PulseShift, ManagedLevel::PulseTimeAck] {
            let config = ModuleConfiguration {
                module: "m".into(),
                managed_level: level,
                cid: 111,
            };
            let bytes = codec.encode(&config).unwrap();
            assert_eq!(codec.decode::<ModuleConfiguration>(&bytes).unwrap().managed_level, level);
        }
    }

    #[test]
    fn test_application_data_is_not_control() {
        let codec = Codec::default();
        let container = Container::new(863, TimeStamp::now(), codec.encode(&PulseAck::default()).unwrap());
        assert_eq!(ControlMessage::decode(&container, &codec).unwrap(), None);
    }

    #[test]
    fn test_stop_addressing() {
        assert!(ModuleStop::all().addresses("anyone"));
        let stop = ModuleStop { module: "player".into() };
        assert!(stop.addresses("player"));
        assert!(!stop.addresses("cockpit"));
    }
}
