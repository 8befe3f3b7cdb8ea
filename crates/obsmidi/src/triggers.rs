//! Trigger grammar and the ordered binding table.
//!
//! An OBS scene or filter name may carry a trigger after the last `::`:
//! `CC<number>#<value>@<channel>`, `PC<number>@<channel>` or
//! `On<note>(#<velocity>)?@<channel>`. Channels are 1-based both in the
//! encoding and in [`MidiMessage`].

use std::fmt;
use std::sync::RwLock;

use crate::midi_io::MidiMessage;

/// A parsed MIDI pattern extracted from the tail of an OBS object name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiTrigger {
    /// Matches on exact channel, controller number and value.
    ControlChange { channel: u8, number: u8, value: u8 },
    /// Matches on exact channel and program number.
    ProgramChange { channel: u8, number: u8 },
    /// Matches on exact channel and note. Without a velocity the note
    /// counts as pressed for any velocity >= 64; with one, the velocity
    /// must match exactly.
    NoteOn {
        channel: u8,
        note: u8,
        velocity: Option<u8>,
    },
}

impl MidiTrigger {
    /// Parse a trigger encoded at the end of an OBS object name, after the
    /// last `::`. `None` when no `::` is present or the suffix does not
    /// follow the grammar; neither case is an error, the name simply yields
    /// no binding.
    pub fn parse_at_end_of(name: &str) -> Option<Self> {
        let (_, suffix) = name.rsplit_once("::")?;
        Self::parse(suffix.trim())
    }

    /// Parse a bare trigger. Kinds are tried in a fixed order (PC, CC,
    /// NoteOn); the grammars are not prefix-free, so the order is load
    /// bearing.
    pub fn parse(s: &str) -> Option<Self> {
        parse_pc(s).or_else(|| parse_cc(s)).or_else(|| parse_note_on(s))
    }

    /// Whether an incoming message satisfies this trigger. Pure.
    pub fn matches(&self, msg: &MidiMessage) -> bool {
        match (self, msg) {
            (
                Self::ControlChange {
                    channel,
                    number,
                    value,
                },
                MidiMessage::ControlChange {
                    channel: msg_channel,
                    control,
                    value: msg_value,
                },
            ) => channel == msg_channel && number == control && value == msg_value,
            (
                Self::ProgramChange { channel, number },
                MidiMessage::ProgramChange {
                    channel: msg_channel,
                    program,
                },
            ) => channel == msg_channel && number == program,
            (
                Self::NoteOn {
                    channel,
                    note,
                    velocity,
                },
                MidiMessage::NoteOn {
                    channel: msg_channel,
                    note: msg_note,
                    velocity: msg_velocity,
                },
            ) => {
                channel == msg_channel
                    && note == msg_note
                    && match velocity {
                        Some(wanted) => wanted == msg_velocity,
                        None => *msg_velocity >= 64,
                    }
            }
            _ => false,
        }
    }
}

/// Canonical label: `CC{n}#{v}@{ch}`, `PC{n}@{ch}`, `On{n}@{ch}`. The
/// note-on form omits the velocity even when one was parsed, so it is not
/// invertible for velocity-bearing triggers.
impl fmt::Display for MidiTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ControlChange {
                channel,
                number,
                value,
            } => write!(f, "CC{number}#{value}@{channel}"),
            Self::ProgramChange { channel, number } => write!(f, "PC{number}@{channel}"),
            Self::NoteOn { channel, note, .. } => write!(f, "On{note}@{channel}"),
        }
    }
}

/// Consume a run of ASCII digits. Leading zeros are fine; values too large
/// for the field are rejected by the range checks below.
fn take_number(s: &str) -> Option<(u32, &str)> {
    let end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    let value = s[..end].parse::<u32>().ok()?;
    Some((value, &s[end..]))
}

fn channel_in_range(n: u32) -> Option<u8> {
    (1..=16).contains(&n).then_some(n as u8)
}

fn data_in_range(n: u32) -> Option<u8> {
    (n <= 127).then_some(n as u8)
}

fn parse_pc(s: &str) -> Option<MidiTrigger> {
    let rest = s.strip_prefix("PC")?;
    let (number, rest) = take_number(rest)?;
    let rest = rest.strip_prefix('@')?;
    let (channel, _) = take_number(rest)?;
    Some(MidiTrigger::ProgramChange {
        channel: channel_in_range(channel)?,
        number: data_in_range(number)?,
    })
}

fn parse_cc(s: &str) -> Option<MidiTrigger> {
    let rest = s.strip_prefix("CC")?;
    let (number, rest) = take_number(rest)?;
    let rest = rest.strip_prefix('#')?;
    let (value, rest) = take_number(rest)?;
    let rest = rest.strip_prefix('@')?;
    let (channel, _) = take_number(rest)?;
    Some(MidiTrigger::ControlChange {
        channel: channel_in_range(channel)?,
        number: data_in_range(number)?,
        value: data_in_range(value)?,
    })
}

fn parse_note_on(s: &str) -> Option<MidiTrigger> {
    let rest = s.strip_prefix("On")?;
    let (note, rest) = take_number(rest)?;
    let (velocity, rest) = match rest.strip_prefix('#') {
        Some(rest) => {
            let (velocity, rest) = take_number(rest)?;
            (Some(data_in_range(velocity)?), rest)
        }
        None => (None, rest),
    };
    let rest = rest.strip_prefix('@')?;
    let (channel, _) = take_number(rest)?;
    Some(MidiTrigger::NoteOn {
        channel: channel_in_range(channel)?,
        note: data_in_range(note)?,
        velocity,
    })
}

/// The remote-control effect bound to a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    SwitchScene {
        scene_name: String,
    },
    EnableFilter {
        source_name: String,
        filter_name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerBinding {
    pub trigger: MidiTrigger,
    pub action: Action,
}

/// Ordered registry of bindings. Insertion order is match priority: the
/// earliest binding whose trigger matches wins, later ones are not
/// evaluated. Appended to only during discovery, read-only afterwards.
#[derive(Default)]
pub struct TriggerTable {
    bindings: RwLock<Vec<TriggerBinding>>,
}

impl TriggerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, trigger: MidiTrigger, action: Action) {
        self.bindings
            .write()
            .expect("trigger table poisoned")
            .push(TriggerBinding { trigger, action });
    }

    /// Resolve a message to the action of the earliest matching binding.
    pub fn find_action(&self, msg: &MidiMessage) -> Option<Action> {
        let bindings = self.bindings.read().expect("trigger table poisoned");
        bindings
            .iter()
            .find(|binding| binding.trigger.matches(msg))
            .map(|binding| binding.action.clone())
    }

    /// Copy of the bindings, in match order.
    pub fn snapshot(&self) -> Vec<TriggerBinding> {
        self.bindings
            .read()
            .expect("trigger table poisoned")
            .clone()
    }

    pub fn len(&self) -> usize {
        self.bindings.read().expect("trigger table poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cc(channel: u8, control: u8, value: u8) -> MidiMessage {
        MidiMessage::ControlChange {
            channel,
            control,
            value,
        }
    }

    #[test]
    fn parses_control_change_suffix() {
        let trigger = MidiTrigger::parse_at_end_of("Scene1 :: CC9#1@1").unwrap();
        assert_eq!(
            trigger,
            MidiTrigger::ControlChange {
                channel: 1,
                number: 9,
                value: 1
            }
        );
    }

    #[test]
    fn parses_program_change_and_note_on() {
        assert_eq!(
            MidiTrigger::parse("PC32@8"),
            Some(MidiTrigger::ProgramChange {
                channel: 8,
                number: 32
            })
        );
        assert_eq!(
            MidiTrigger::parse("On60@8"),
            Some(MidiTrigger::NoteOn {
                channel: 8,
                note: 60,
                velocity: None
            })
        );
        assert_eq!(
            MidiTrigger::parse("On60#127@8"),
            Some(MidiTrigger::NoteOn {
                channel: 8,
                note: 60,
                velocity: Some(127)
            })
        );
    }

    #[test]
    fn leading_zeros_parse_to_the_same_trigger() {
        assert_eq!(
            MidiTrigger::parse("CC08#010@07"),
            MidiTrigger::parse("CC8#10@7")
        );
    }

    #[test]
    fn splits_on_the_last_double_colon() {
        let trigger = MidiTrigger::parse_at_end_of("A :: B :: CC1#2@3").unwrap();
        assert_eq!(
            trigger,
            MidiTrigger::ControlChange {
                channel: 3,
                number: 1,
                value: 2
            }
        );
    }

    #[test]
    fn name_without_separator_yields_nothing() {
        assert_eq!(MidiTrigger::parse_at_end_of("Scene1"), None);
        assert_eq!(MidiTrigger::parse_at_end_of("CC9#1@1"), None);
    }

    #[test]
    fn unparseable_suffix_yields_nothing() {
        assert_eq!(MidiTrigger::parse_at_end_of("Scene1 :: hello"), None);
        assert_eq!(MidiTrigger::parse_at_end_of("Scene1 ::"), None);
        assert_eq!(MidiTrigger::parse_at_end_of("Scene1 :: CC9#@1"), None);
    }

    #[test]
    fn channel_bounds_are_enforced() {
        assert!(MidiTrigger::parse("CC9#1@1").is_some());
        assert!(MidiTrigger::parse("CC9#1@16").is_some());
        assert!(MidiTrigger::parse("CC9#1@0").is_none());
        assert!(MidiTrigger::parse("CC9#1@17").is_none());
    }

    #[test]
    fn data_byte_bounds_are_enforced() {
        assert!(MidiTrigger::parse("CC127#127@1").is_some());
        assert!(MidiTrigger::parse("CC128#1@1").is_none());
        assert!(MidiTrigger::parse("CC1#128@1").is_none());
        assert!(MidiTrigger::parse("PC128@1").is_none());
        assert!(MidiTrigger::parse("On128@1").is_none());
        assert!(MidiTrigger::parse("On60#128@1").is_none());
    }

    #[test]
    fn control_change_requires_exact_match() {
        let trigger = MidiTrigger::parse("CC9#1@1").unwrap();
        assert!(trigger.matches(&cc(1, 9, 1)));
        assert!(!trigger.matches(&cc(2, 9, 1)));
        assert!(!trigger.matches(&cc(1, 10, 1)));
        assert!(!trigger.matches(&cc(1, 9, 2)));
        assert!(!trigger.matches(&MidiMessage::ProgramChange {
            channel: 1,
            program: 9
        }));
    }

    #[test]
    fn note_on_without_velocity_means_pressed() {
        let trigger = MidiTrigger::parse("On60@1").unwrap();
        let note = |velocity| MidiMessage::NoteOn {
            channel: 1,
            note: 60,
            velocity,
        };
        assert!(trigger.matches(&note(64)));
        assert!(trigger.matches(&note(127)));
        assert!(!trigger.matches(&note(63)));
        assert!(!trigger.matches(&note(0)));
    }

    #[test]
    fn note_on_with_velocity_matches_exactly() {
        let trigger = MidiTrigger::parse("On60#10@1").unwrap();
        let note = |velocity| MidiMessage::NoteOn {
            channel: 1,
            note: 60,
            velocity,
        };
        assert!(trigger.matches(&note(10)));
        assert!(!trigger.matches(&note(64)));
    }

    #[test]
    fn canonical_form_round_trips_except_note_velocity() {
        for text in ["CC9#1@1", "PC32@8", "On60@8"] {
            let trigger = MidiTrigger::parse(text).unwrap();
            assert_eq!(MidiTrigger::parse(&trigger.to_string()), Some(trigger));
            assert_eq!(trigger.to_string(), text);
        }

        // the canonical note-on label drops the velocity, so a
        // velocity-bearing trigger does not survive the round trip
        let trigger = MidiTrigger::parse("On60#10@8").unwrap();
        assert_eq!(trigger.to_string(), "On60@8");
        assert_eq!(
            MidiTrigger::parse(&trigger.to_string()),
            Some(MidiTrigger::NoteOn {
                channel: 8,
                note: 60,
                velocity: None
            })
        );
    }

    #[test]
    fn earliest_matching_binding_wins() {
        let table = TriggerTable::new();
        let trigger = MidiTrigger::parse("CC9#1@1").unwrap();
        table.insert(
            trigger,
            Action::SwitchScene {
                scene_name: "first".into(),
            },
        );
        table.insert(
            trigger,
            Action::SwitchScene {
                scene_name: "second".into(),
            },
        );

        assert_eq!(
            table.find_action(&cc(1, 9, 1)),
            Some(Action::SwitchScene {
                scene_name: "first".into()
            })
        );
    }

    #[test]
    fn matching_does_not_mutate_the_table() {
        let table = TriggerTable::new();
        table.insert(
            MidiTrigger::parse("CC9#1@1").unwrap(),
            Action::SwitchScene {
                scene_name: "first".into(),
            },
        );

        assert_eq!(table.find_action(&cc(1, 32, 64)), None);
        assert_eq!(table.len(), 1);
        assert_eq!(table.snapshot().len(), 1);
    }
}
