//! Capturing and restoring playback state

use crate::{
    NUM_VOICES,
    channel::VirtualChannel,
    duration::PositionInfo,
    player::{GlobalState, Player, VoiceState},
    result::{PlayResult, PlaybackError},
};

/// Complete playback state of a [`Player`], at a tick boundary.
///
/// Tables are shared through the module, so this is a small value copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Sub-song being played
    pub sub_song: usize,
    /// Global state
    pub global: GlobalState,
    /// Per voice state
    pub voices: [VoiceState; NUM_VOICES],
    /// Which voices reached the end of their position list
    pub channels_done: [bool; NUM_VOICES],
}

impl Player {
    /// Capture the playback state
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            sub_song: self.sub_song,
            global: self.global.clone(),
            voices: self.voices.clone(),
            channels_done: self.channels_done,
        }
    }
    /// Continue playback from `snapshot`.
    ///
    /// The snapshot may come from another player of the same module.
    pub fn restore(&mut self, snapshot: &Snapshot) -> PlayResult {
        if snapshot.sub_song >= self.module.sub_song_count() {
            return Err(PlaybackError::NoSuchSubSong(snapshot.sub_song));
        }
        self.sub_song = snapshot.sub_song;
        self.global.clone_from(&snapshot.global);
        self.voices.clone_from(&snapshot.voices);
        self.channels_done = snapshot.channels_done;
        self.song_ended = false;
        Ok(())
    }
    /// Jump to a seek point from [`calculate_durations`](crate::calculate_durations)
    pub fn seek<C: VirtualChannel>(
        &mut self,
        position: &PositionInfo,
        channels: &mut [C; NUM_VOICES],
    ) -> PlayResult {
        self.restore(&position.snapshot)?;
        for channel in channels {
            channel.mute();
        }
        self.notify_positions();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            channel::{ChannelCommand, RecordingChannel},
            features::{
                Effects, Features, InstrumentLayout, PortamentoVibrato, SpeedVariation,
                TrackDialect, VibratoTable,
            },
            testing::ImageBuilder,
        },
        std::{sync::Arc, time::Duration},
    };

    fn two_song_module() -> Arc<crate::Module> {
        let features = Features {
            track: TrackDialect::V4,
            instruments: InstrumentLayout::V2,
            speed_variation: SpeedVariation::Table,
            vibrato: VibratoTable::Halving,
            portamento_vibrato: PortamentoVibrato::OnlyOne,
            effects: Effects::empty(),
        };
        let list = [0x02, 0x00, 0x01, 0x01, 0xff, 0x00];
        let img = ImageBuilder::new(features)
            .sub_song(std::array::from_fn(|_| list.to_vec()), [1, 0, 0, 0, 0, 0, 0, 0])
            .sub_song(std::array::from_fn(|_| vec![0x01, 0x01, 0xff, 0x00]), [0; 8])
            .track([0x30, 3, 0x34, 2, 0xff])
            .track([0x37, 5, 0xff])
            .instrument([0, 40, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0])
            .sample(vec![0; 64], 0, 1)
            .build();
        Arc::new(crate::load(&img.data).unwrap())
    }

    #[test]
    fn restore_across_players() {
        let module = two_song_module();
        let mut a = Player::new(Arc::clone(&module), 0).unwrap();
        let mut b = Player::new(Arc::clone(&module), 1).unwrap();
        let mut ch: [RecordingChannel; NUM_VOICES] = Default::default();
        for _ in 0..9 {
            a.tick(&mut ch).unwrap();
        }
        b.restore(&a.snapshot()).unwrap();
        assert_eq!(b.sub_song(), 0);
        for _ in 0..50 {
            assert_eq!(a.tick(&mut ch).unwrap(), b.tick(&mut ch).unwrap());
            assert_eq!(a.snapshot(), b.snapshot());
        }
    }

    #[test]
    fn restore_rejects_foreign_sub_song() {
        let module = two_song_module();
        let mut player = Player::new(module, 0).unwrap();
        let mut snap = player.snapshot();
        snap.sub_song = 5;
        assert_eq!(
            player.restore(&snap),
            Err(PlaybackError::NoSuchSubSong(5))
        );
    }

    #[test]
    fn seek_mutes_channels() {
        let module = two_song_module();
        let mut player = Player::new(module, 0).unwrap();
        let mut ch: [RecordingChannel; NUM_VOICES] = Default::default();
        for _ in 0..4 {
            player.tick(&mut ch).unwrap();
        }
        let pos = PositionInfo {
            time: Duration::from_millis(80),
            snapshot: player.snapshot(),
        };
        for _ in 0..10 {
            player.tick(&mut ch).unwrap();
        }
        for c in &mut ch {
            c.take();
        }
        player.seek(&pos, &mut ch).unwrap();
        assert_eq!(player.snapshot(), pos.snapshot);
        assert!(ch.iter().all(|c| c.commands == [ChannelCommand::Mute]));
    }
}
