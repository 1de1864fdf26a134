//! Bus discovery, activation and speaker-arrangement negotiation.

use serde::{Deserialize, Serialize};

use super::model::Processor;
use super::types::*;

/// Negotiated bus layout.  Only changes through [`negotiate`], which the
/// session calls at configure time and after an IO-changed notification.
///
/// Every list holds one entry per plugin bus, so position `i` is always the
/// plugin's bus `i`.  A bus the plugin gave no info for is kept as a
/// zero-channel placeholder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfiguration {
    pub audio_inputs: Vec<BusDescriptor>,
    pub audio_outputs: Vec<BusDescriptor>,
    pub event_inputs: Vec<BusDescriptor>,
    pub event_output_count: usize,
    pub input_arrangements: Vec<SpeakerArrangement>,
    pub output_arrangements: Vec<SpeakerArrangement>,
}

impl BusConfiguration {
    pub fn summary(&self) -> IoSummary {
        IoSummary {
            audio_inputs: self.audio_inputs.iter().map(|b| b.channel_count).collect(),
            audio_outputs: self.audio_outputs.iter().map(|b| b.channel_count).collect(),
            event_inputs: self.event_inputs.len(),
            event_outputs: self.event_output_count,
        }
    }

    pub fn has_event_input(&self) -> bool {
        !self.event_inputs.is_empty()
    }

    /// Do the host's buffers match this layout for a block of `num_samples`?
    pub fn matches(&self, inputs: &[&[&[f32]]], outputs: &[&mut [&mut [f32]]], num_samples: usize) -> bool {
        inputs.len() == self.audio_inputs.len()
            && outputs.len() == self.audio_outputs.len()
            && inputs.iter().zip(&self.audio_inputs).all(|(bus, desc)| {
                bus.len() == desc.channel_count as usize
                    && bus.iter().all(|ch| ch.len() >= num_samples)
            })
            && outputs.iter().zip(&self.audio_outputs).all(|(bus, desc)| {
                bus.len() == desc.channel_count as usize
                    && bus.iter().all(|ch| ch.len() >= num_samples)
            })
    }
}

/// Enumerate and activate every bus, then push the plugin's own speaker
/// arrangements back to it.  Must run while the plugin is inactive.
///
/// A rejected arrangement is logged and the plugin keeps its default.
pub fn negotiate(processor: &mut dyn Processor) -> BusConfiguration {
    let audio_inputs = activate_all(processor, MediaKind::Audio, BusDirection::Input);
    let audio_outputs = activate_all(processor, MediaKind::Audio, BusDirection::Output);
    let event_inputs = activate_all(processor, MediaKind::Event, BusDirection::Input);
    // Event outputs are counted but left inactive; nothing reads them.
    let event_output_count = processor.bus_count(MediaKind::Event, BusDirection::Output);

    let input_arrangements = arrangements(processor, BusDirection::Input, &audio_inputs);
    let output_arrangements = arrangements(processor, BusDirection::Output, &audio_outputs);

    if !audio_inputs.is_empty() || !audio_outputs.is_empty() {
        if let Err(e) = processor.set_bus_arrangements(&input_arrangements, &output_arrangements) {
            log::warn!(
                "Bus arrangement rejected ({}), continuing with the plugin default",
                e
            );
        }
    }

    let config = BusConfiguration {
        audio_inputs,
        audio_outputs,
        event_inputs,
        event_output_count,
        input_arrangements,
        output_arrangements,
    };
    let summary = config.summary();
    log::debug!(
        "Negotiated IO: {:?} ({} in / {} out channels)",
        summary,
        summary.total_input_channels(),
        summary.total_output_channels()
    );
    config
}

fn activate_all(
    processor: &mut dyn Processor,
    media: MediaKind,
    direction: BusDirection,
) -> Vec<BusDescriptor> {
    let count = processor.bus_count(media, direction);
    let mut buses = Vec::with_capacity(count);
    for index in 0..count {
        let Some(info) = processor.bus_info(media, direction, index) else {
            log::warn!(
                "No info for {:?} {:?} bus {}, keeping it inactive with no channels",
                media,
                direction,
                index
            );
            buses.push(BusDescriptor {
                direction,
                media,
                channel_count: 0,
                name: String::new(),
            });
            continue;
        };
        if let Err(e) = processor.activate_bus(media, direction, index, true) {
            log::warn!(
                "Activating {:?} {:?} bus {} failed: {}",
                media,
                direction,
                index,
                e
            );
        }
        buses.push(BusDescriptor {
            direction,
            media,
            channel_count: info.channel_count,
            name: info.name,
        });
    }
    buses
}

fn arrangements(
    processor: &dyn Processor,
    direction: BusDirection,
    buses: &[BusDescriptor],
) -> Vec<SpeakerArrangement> {
    buses
        .iter()
        .enumerate()
        .map(|(index, bus)| {
            processor
                .bus_arrangement(direction, index)
                .unwrap_or_else(|| default_arrangement(bus.channel_count))
        })
        .collect()
}

/// One speaker bit per channel, which is what plugins report for plain
/// mono/stereo/N-channel layouts.
fn default_arrangement(channels: u32) -> SpeakerArrangement {
    if channels >= 64 {
        u64::MAX
    } else {
        (1u64 << channels) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus(direction: BusDirection, channels: u32) -> BusDescriptor {
        BusDescriptor {
            direction,
            media: MediaKind::Audio,
            channel_count: channels,
            name: String::new(),
        }
    }

    #[test]
    fn test_matches_checks_buses_and_channels() {
        let config = BusConfiguration {
            audio_inputs: vec![bus(BusDirection::Input, 2)],
            audio_outputs: vec![bus(BusDirection::Output, 1)],
            ..Default::default()
        };
        let l = [0.0f32; 64];
        let r = [0.0f32; 64];
        let mut o = [0.0f32; 64];
        let input: [&[f32]; 2] = [&l, &r];
        let inputs: [&[&[f32]]; 1] = [&input];
        let mut out_ch: [&mut [f32]; 1] = [&mut o];
        let mut outputs: [&mut [&mut [f32]]; 1] = [&mut out_ch];

        assert!(config.matches(&inputs, &outputs, 64));
        assert!(!config.matches(&inputs, &outputs, 65));
        assert!(!config.matches(&[], &outputs, 64));
        outputs[0] = &mut [];
        assert!(!config.matches(&inputs, &outputs, 64));
    }

    #[test]
    fn test_default_arrangement() {
        assert_eq!(default_arrangement(1), 0b1);
        assert_eq!(default_arrangement(2), 0b11);
        assert_eq!(default_arrangement(0), 0);
    }
}
