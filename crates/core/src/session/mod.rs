//! Editing session: one timeline, one playback engine and the command surface
//! used by front ends.

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use image::RgbaImage;

use crate::{
    config::AppConfig,
    engine::{Pacer, PlaybackEngine, Presenter, StepOutcome},
    export::{
        export_timeline, ExportArtifact, ExportBuilder, ExportOutcome, ExportProgress, Quality,
    },
    media::MediaBackend,
    scene::{ImageFilter, ImagePosition},
    timeline::{TimePosition, Timeline, TimelineEvent, VideoSegmentInfo},
    ImageId, Result, SegmentId,
};

/// Requests accepted by [`Session::dispatch`].
#[derive(Debug, Clone)]
pub enum Command {
    AddVideo {
        bytes: Vec<u8>,
    },
    AddImage {
        video: SegmentId,
        image: RgbaImage,
        position: ImagePosition,
    },
    ChangeImagePosition {
        image: ImageId,
        position: ImagePosition,
    },
    ChangeFilter {
        video: SegmentId,
        filter: ImageFilter,
    },
    ToggleVisibility {
        video: SegmentId,
    },
    Play,
    Pause,
    SeekPreview {
        video: SegmentId,
        timestamp_ms: f64,
    },
    Export {
        quality: Quality,
    },
}

/// Outbound notifications for front ends.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    VideoSegmentAdded(VideoSegmentInfo),
    ImageAdded(ImageId),
    DisplayOrderChanged(Vec<SegmentId>),
    TimePositionsRecalculated(Vec<TimePosition>),
    /// `None` when there was nothing to export.
    ExportFinished(Option<ExportArtifact>),
}

pub struct Session {
    config: AppConfig,
    backend: Arc<dyn MediaBackend>,
    timeline: Timeline,
    engine: PlaybackEngine,
    timeline_events: Receiver<TimelineEvent>,
    notify_tx: Sender<Notification>,
    notify_rx: Receiver<Notification>,
}

impl Session {
    pub fn new(
        config: AppConfig,
        backend: Arc<dyn MediaBackend>,
        presenter: Box<dyn Presenter>,
        pacer: Box<dyn Pacer>,
    ) -> Self {
        let mut timeline = Timeline::new();
        let timeline_events = timeline.subscribe();
        let mut engine =
            PlaybackEngine::new(&config.playback, Arc::clone(&backend), presenter, pacer);
        engine.observe(&mut timeline);
        let (notify_tx, notify_rx) = unbounded();

        Self {
            config,
            backend,
            timeline,
            engine,
            timeline_events,
            notify_tx,
            notify_rx,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut PlaybackEngine {
        &mut self.engine
    }

    pub fn notifications(&self) -> &Receiver<Notification> {
        &self.notify_rx
    }

    pub fn dispatch(&mut self, command: Command) -> Result<()> {
        let result = self.apply(command);
        if let Err(err) = &result {
            tracing::warn!(error = %err, "command rejected");
        }
        self.sync();
        result
    }

    /// Demuxes `bytes` and adds the media as a new video segment. Nothing is
    /// added when the backend cannot decode the video track.
    pub fn import(&mut self, bytes: &[u8]) -> Result<SegmentId> {
        let media = self.backend.demux(bytes)?;
        self.backend.check_video_config(&media.video)?;
        let id = self.timeline.add_media(media);
        tracing::info!(segment = %id, "video imported");
        self.sync();
        Ok(id)
    }

    pub fn step(&mut self) -> StepOutcome {
        self.engine.step(&self.timeline)
    }

    pub fn export(&mut self, quality: Quality) -> Result<ExportOutcome> {
        let outcome = export_timeline(
            self.backend.as_ref(),
            &self.config.export,
            &self.timeline,
            Some(quality),
        )?;
        self.notify(Notification::ExportFinished(outcome.clone().artifact()));
        Ok(outcome)
    }

    pub fn export_with_progress(
        &mut self,
        quality: Quality,
        progress: impl FnMut(ExportProgress),
    ) -> Result<ExportOutcome> {
        let outcome = ExportBuilder::new(self.backend.as_ref(), &self.config.export)
            .on_progress(progress)
            .export(&self.timeline, quality)?;
        self.notify(Notification::ExportFinished(outcome.clone().artifact()));
        Ok(outcome)
    }

    /// Applies commands as they arrive and steps the engine in between.
    /// Returns once `commands` is disconnected and playback is idle.
    pub fn run(&mut self, commands: &Receiver<Command>) -> Result<()> {
        let mut disconnected = false;
        loop {
            while !disconnected {
                match commands.try_recv() {
                    Ok(command) => self.dispatch_logged(command),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => disconnected = true,
                }
            }

            if self.engine.is_active() {
                self.step();
                continue;
            }
            if disconnected {
                tracing::debug!("command channel closed, session idle");
                return Ok(());
            }
            match commands.recv() {
                Ok(command) => self.dispatch_logged(command),
                Err(_) => disconnected = true,
            }
        }
    }

    fn dispatch_logged(&mut self, command: Command) {
        if let Err(err) = self.dispatch(command) {
            tracing::debug!(error = %err, "continuing after rejected command");
        }
    }

    fn apply(&mut self, command: Command) -> Result<()> {
        match command {
            Command::AddVideo { bytes } => {
                self.import(&bytes)?;
            }
            Command::AddImage {
                video,
                image,
                position,
            } => {
                self.timeline.add_image_segment(video, image, position)?;
            }
            Command::ChangeImagePosition { image, position } => {
                self.timeline.set_image_position(image, position)?;
            }
            Command::ChangeFilter { video, filter } => {
                self.timeline.set_filter(video, filter)?;
            }
            Command::ToggleVisibility { video } => {
                self.timeline.toggle_visibility(video)?;
            }
            Command::Play => self.engine.start(),
            Command::Pause => self.engine.pause(),
            Command::SeekPreview {
                video,
                timestamp_ms,
            } => {
                self.engine
                    .show_preview(&self.timeline, video, timestamp_ms)?;
            }
            Command::Export { quality } => {
                self.export(quality)?;
            }
        }
        Ok(())
    }

    /// Publishes pending timeline events and lets the engine react to them.
    fn sync(&mut self) {
        self.forward_timeline_events();
        self.engine.apply_timeline_events(&self.timeline);
    }

    fn forward_timeline_events(&mut self) {
        let events: Vec<TimelineEvent> = self.timeline_events.try_iter().collect();
        for event in events {
            let notification = match event {
                TimelineEvent::VideoAdded(info) => Notification::VideoSegmentAdded(info),
                TimelineEvent::ImageAdded { image, .. } => Notification::ImageAdded(image),
                TimelineEvent::DisplayOrderChanged(order) => {
                    Notification::DisplayOrderChanged(order)
                }
                TimelineEvent::TimePositionsRecalculated(positions) => {
                    Notification::TimePositionsRecalculated(positions)
                }
                TimelineEvent::ImagePositionChanged { .. } | TimelineEvent::FilterChanged { .. } => {
                    continue
                }
            };
            self.notify(notification);
        }
    }

    fn notify(&self, notification: Notification) {
        let _ = self.notify_tx.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ChannelPresenter, PreviewEvent};
    use crate::media::{raw::RawBackend, DemuxedMedia, VideoTrackInfo};
    use crate::media::{EncoderConfig, Muxer, VideoDecoder, VideoEncoder};
    use crate::test_support::{clip_bytes, playback_config, CountingPacer, FRAME_US};
    use crate::{config::ResumePolicy, ClipCraftError};

    fn session() -> (Session, Receiver<PreviewEvent>) {
        session_with(Arc::new(RawBackend::new()))
    }

    fn session_with(backend: Arc<dyn MediaBackend>) -> (Session, Receiver<PreviewEvent>) {
        let (presenter, frames) = ChannelPresenter::new();
        let mut config = AppConfig::default();
        config.playback = playback_config(ResumePolicy::PreviewOnly, 8);
        config.export.watermark = None;
        let session = Session::new(
            config,
            backend,
            Box::new(presenter),
            Box::new(CountingPacer::default()),
        );
        (session, frames)
    }

    fn drain(session: &Session) -> Vec<Notification> {
        session.notifications().try_iter().collect()
    }

    /// Reports every track as H.264 so imports are rejected.
    struct ForeignCodecBackend(RawBackend);

    impl MediaBackend for ForeignCodecBackend {
        fn demux(&self, bytes: &[u8]) -> Result<DemuxedMedia> {
            let mut media = self.0.demux(bytes)?;
            media.video.codec = "avc1.42001f".to_string();
            Ok(media)
        }

        fn check_video_config(&self, track: &VideoTrackInfo) -> Result<()> {
            self.0.check_video_config(track)
        }

        fn video_decoder(&self, track: &VideoTrackInfo) -> Result<Box<dyn VideoDecoder>> {
            self.0.video_decoder(track)
        }

        fn video_encoder(&self, config: &EncoderConfig) -> Result<Box<dyn VideoEncoder>> {
            self.0.video_encoder(config)
        }

        fn muxer(&self, config: &EncoderConfig) -> Result<Box<dyn Muxer>> {
            self.0.muxer(config)
        }
    }

    #[test]
    fn adding_videos_publishes_notifications() {
        let (mut session, frames) = session();
        session
            .dispatch(Command::AddVideo {
                bytes: clip_bytes(3, 3),
            })
            .unwrap();

        let id = session.timeline().display_order()[0];
        let notifications = drain(&session);
        assert!(matches!(
            &notifications[0],
            Notification::VideoSegmentAdded(info) if info.id == id && info.total_chunks == 3
        ));
        assert_eq!(notifications[1], Notification::DisplayOrderChanged(vec![id]));
        assert_eq!(notifications.len(), 2);
        assert!(matches!(frames.try_recv().unwrap(), PreviewEvent::Frame(_)));
    }

    #[test]
    fn unsupported_codecs_never_create_segments() {
        let (mut session, _frames) = session_with(Arc::new(ForeignCodecBackend(RawBackend::new())));

        let err = session
            .dispatch(Command::AddVideo {
                bytes: clip_bytes(3, 3),
            })
            .unwrap_err();

        assert!(matches!(err, ClipCraftError::UnsupportedCodec { .. }));
        assert!(session.timeline().video_segments().is_empty());
        assert!(drain(&session).is_empty());
    }

    #[test]
    fn toggling_reports_new_order_and_times() {
        let (mut session, _frames) = session();
        let first = session.import(&clip_bytes(30, 10)).unwrap();
        let second = session.import(&clip_bytes(15, 5)).unwrap();
        drain(&session);

        session
            .dispatch(Command::ToggleVisibility { video: first })
            .unwrap();

        assert_eq!(
            drain(&session),
            vec![
                Notification::DisplayOrderChanged(vec![second]),
                Notification::TimePositionsRecalculated(vec![(second, 0.0)]),
            ]
        );
    }

    #[test]
    fn image_commands_notify_and_reject_unknown_targets() {
        let (mut session, _frames) = session();
        let video = session.import(&clip_bytes(2, 1)).unwrap();
        drain(&session);

        session
            .dispatch(Command::AddImage {
                video,
                image: RgbaImage::new(1, 1),
                position: ImagePosition::Bottom,
            })
            .unwrap();
        let image = match drain(&session).as_slice() {
            [Notification::ImageAdded(image)] => *image,
            other => panic!("unexpected notifications {other:?}"),
        };

        session
            .dispatch(Command::ChangeImagePosition {
                image,
                position: ImagePosition::Left,
            })
            .unwrap();
        assert!(drain(&session).is_empty());
        assert!(session
            .dispatch(Command::ChangeFilter {
                video: SegmentId(999),
                filter: ImageFilter::Sepia,
            })
            .is_err());
    }

    #[test]
    fn run_plays_until_commands_stop() {
        let (mut session, frames) = session();
        let (tx, rx) = unbounded();
        tx.send(Command::AddVideo {
            bytes: clip_bytes(4, 2),
        })
        .unwrap();
        tx.send(Command::Play).unwrap();
        drop(tx);

        session.run(&rx).unwrap();

        let timestamps: Vec<i64> = frames
            .try_iter()
            .filter_map(|event| match event {
                PreviewEvent::Frame(frame) => Some(frame.timestamp_us),
                PreviewEvent::Cleared => None,
            })
            .collect();
        assert_eq!(timestamps, vec![0, 0, FRAME_US, 2 * FRAME_US, 3 * FRAME_US]);
        assert!(!session.engine().is_active());
    }

    #[test]
    fn export_command_publishes_the_artifact() {
        let (mut session, _frames) = session();
        session
            .dispatch(Command::Export {
                quality: Quality::Sd,
            })
            .unwrap();
        assert_eq!(drain(&session), vec![Notification::ExportFinished(None)]);

        session.import(&clip_bytes(3, 3)).unwrap();
        drain(&session);
        let outcome = session.export(Quality::Sd).unwrap();

        let artifact = outcome.artifact().unwrap();
        assert_eq!(artifact.frame_count, 3);
        assert_eq!(
            drain(&session),
            vec![Notification::ExportFinished(Some(artifact))]
        );
    }

    #[test]
    fn seek_preview_selects_the_segment() {
        let (mut session, frames) = session();
        let first = session.import(&clip_bytes(3, 3)).unwrap();
        let second = session.import(&clip_bytes(6, 3)).unwrap();
        session.step();
        frames.try_iter().count();

        session
            .dispatch(Command::SeekPreview {
                video: second,
                timestamp_ms: 100.0,
            })
            .unwrap();

        assert_eq!(session.engine().selected(), Some(second));
        let shown: Vec<(SegmentId, i64)> = frames
            .try_iter()
            .filter_map(|event| match event {
                PreviewEvent::Frame(frame) => Some((frame.segment, frame.timestamp_us)),
                PreviewEvent::Cleared => None,
            })
            .collect();
        assert_eq!(shown, vec![(second, 3 * FRAME_US)]);
        assert_ne!(first, second);
    }
}
