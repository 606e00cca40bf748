//! The analysis driver.
//!
//! [`Analyzer`] is the main entry point of the crate. It opens a recording
//! directory, selects the video and AC-3 streams, and then feeds every
//! segment through the demultiplexers, the header parser, the detectors
//! and the [`MarkEngine`]. The resulting timeline is written to the mark
//! file and checked against the recording's index.
//!
//! # Example
//!
//! ```no_run
//! use cutmarks::{AnalysisOptions, Analyzer};
//!
//! let options = AnalysisOptions::new().with_backup_marks(true);
//! let mut analyzer = Analyzer::open("/video/Show/2024-01-01.20.15.1-0.rec", options)?;
//! let summary = analyzer.run()?;
//! for mark in summary.marks.iter() {
//!     println!("{} {} {}", mark.position, mark.mark_type, mark.reason);
//! }
//! # Ok::<(), cutmarks::CutmarksError>(())
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::audio::ChannelDetector;
use crate::configuration::AnalysisOptions;
use crate::decoder::{DecodedFrame, FrameDecoder};
use crate::demux::{Demux, PayloadKind, PesStream};
use crate::engine::{FALLBACK_FPS, MarkEngine, effective_fps};
use crate::error::CutmarksError;
use crate::headers::{HeaderParser, VideoHeader};
use crate::index::{IndexFile, IndexStatus, IndexWaiter};
use crate::logo::{LogoDetector, LogoExtraction};
use crate::marks::{MarkFile, MarkReason, Marks};
use crate::notify::NotifyEvent;
use crate::overlap::{AdBlock, Histogram, OverlapPosition, OverlapScan};
use crate::progress::{OperationType, ProgressTracker};
use crate::recording::{PidLock, RecordingFormat, RecordingInfo, RecordingLayout};
use crate::stream_info::{BroadcastInfo, PictureType, RecordingTimers, StreamContext, VideoCodec};
use crate::transport::ProgramMap;
use crate::validation::{ValidationReport, validate_context, validate_marks};
use crate::video::VideoAnalyzer;

/// Bytes read from a segment per step.
pub const CHUNK_SIZE: usize = 385_024;

/// Seconds of pictures compared on each side of an ad block.
const OVERLAP_WINDOW_SECS: f64 = 120.0;
/// Pictures after an I-frame that still count as belonging to it.
const MAX_IFRAME_DISTANCE: u64 = 3;

/// Where the video elementary stream lives in the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoSource {
    /// Transport stream packets with this PID.
    Transport(u16),
    /// Video PES packets of a program stream.
    Program,
}

/// Result of a completed analysis.
#[derive(Debug, Clone)]
pub struct AnalysisSummary {
    /// The final timeline, as written to the mark file.
    pub marks: Marks,
    /// Stream summary and index check.
    pub report: ValidationReport,
    /// Pictures counted.
    pub frames: u64,
    /// Frame rate used for timecodes.
    pub frames_per_second: f64,
    /// Path of the mark file written.
    pub mark_file: PathBuf,
    /// Wall-clock time of the run.
    pub elapsed: Duration,
    /// Time spent waiting for a growing recording.
    pub index_wait: Duration,
}

impl AnalysisSummary {
    /// How many times faster than realtime the recording was analyzed.
    pub fn realtime_factor(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        (secs > 0.0 && self.frames_per_second > 0.0)
            .then(|| self.frames as f64 / self.frames_per_second / secs)
    }
}

/// Analyzes one recording directory.
///
/// Created via [`Analyzer::open`]; the pid lock (if enabled) is held until
/// the analyzer is dropped.
pub struct Analyzer {
    layout: RecordingLayout,
    options: AnalysisOptions,
    context: StreamContext,
    codec: VideoCodec,
    video_source: VideoSource,
    ac3_pid: Option<u16>,
    decoder: Option<Box<dyn FrameDecoder>>,
    title: String,
    _lock: Option<PidLock>,
}

impl Debug for Analyzer {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Analyzer")
            .field("directory", &self.layout.directory())
            .field("format", &self.layout.format())
            .field("codec", &self.codec)
            .field("video_source", &self.video_source)
            .field("ac3_pid", &self.ac3_pid)
            .field("has_decoder", &self.decoder.is_some())
            .field("options", &self.options)
            .finish()
    }
}

impl Analyzer {
    /// Open the recording in `directory`.
    ///
    /// Detects the recording format, takes the pid lock, reads the info
    /// file and selects the streams. Transport streams must start with
    /// valid program tables naming a video stream.
    ///
    /// # Errors
    ///
    /// Returns [`CutmarksError::InvalidOption`] for out-of-range options,
    /// [`CutmarksError::DuplicateInstance`] when another analysis holds the
    /// lock, [`CutmarksError::InvalidProgramTables`] or
    /// [`CutmarksError::NoVideoStream`] for unusable transport streams,
    /// and I/O errors from reading the recording.
    pub fn open<P: AsRef<Path>>(
        directory: P,
        options: AnalysisOptions,
    ) -> Result<Self, CutmarksError> {
        options.validate()?;
        let layout = RecordingLayout::detect(directory)?;
        debug!(
            "opening {} ({:?})",
            layout.directory().display(),
            layout.format()
        );

        let lock = if options.use_pid_file {
            Some(PidLock::acquire(layout.directory())?)
        } else {
            None
        };

        let info = match RecordingInfo::load(
            &layout.info_path(),
            options.ignore_video_info,
            options.ignore_audio_info,
        ) {
            Ok(info) => info,
            Err(error) => {
                warn!("cannot read {}: {error}", layout.info_path().display());
                RecordingInfo::default()
            }
        };
        let context = build_context(&info, &options);

        let (codec, video_source, ac3_pid) = match layout.format() {
            RecordingFormat::TransportStream => {
                let map = ProgramMap::read_from(&layout.segment_path(1))?;
                let (pid, codec) = map.video().ok_or(CutmarksError::NoVideoStream)?;
                debug!("video pid {pid:#06x} ({codec})");
                let ac3_pid = map.ac3_pid();
                if let Some(pid) = ac3_pid {
                    debug!("AC3 pid {pid:#06x}");
                }
                (codec, VideoSource::Transport(pid), ac3_pid)
            }
            RecordingFormat::Vdr => {
                let codec = layout.probe_vdr_codec()?;
                debug!("program stream video ({codec})");
                (codec, VideoSource::Program, None)
            }
        };

        let title = info.title.clone().unwrap_or_else(|| {
            layout
                .directory()
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default()
        });

        let mut analyzer = Self {
            layout,
            options,
            context,
            codec,
            video_source,
            ac3_pid,
            decoder: None,
            title,
            _lock: lock,
        };
        analyzer.decoder = analyzer.default_decoder();
        Ok(analyzer)
    }

    #[cfg(feature = "ffmpeg")]
    fn default_decoder(&self) -> Option<Box<dyn FrameDecoder>> {
        if !self.context.decode_video {
            return None;
        }
        match crate::ffmpeg::FfmpegDecoder::new(self.codec) {
            Ok(decoder) => Some(Box::new(decoder)),
            Err(error) => {
                warn!("video decoding disabled: {error}");
                None
            }
        }
    }

    #[cfg(not(feature = "ffmpeg"))]
    fn default_decoder(&self) -> Option<Box<dyn FrameDecoder>> {
        None
    }

    /// Use `decoder` for pictures instead of the default.
    #[must_use]
    pub fn with_decoder(mut self, decoder: Box<dyn FrameDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// The recording layout.
    pub fn layout(&self) -> &RecordingLayout {
        &self.layout
    }

    /// Stream properties known so far.
    pub fn context(&self) -> &StreamContext {
        &self.context
    }

    /// Codec family of the selected video stream.
    pub fn codec(&self) -> VideoCodec {
        self.codec
    }

    /// Where the video stream is read from.
    pub fn video_source(&self) -> VideoSource {
        self.video_source
    }

    /// PID of the AC-3 stream, for transport streams.
    pub fn ac3_pid(&self) -> Option<u16> {
        self.ac3_pid
    }

    /// Broadcast title, or the directory name.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Path of the mark file this analyzer writes.
    pub fn mark_file_path(&self) -> PathBuf {
        let name = self
            .options
            .mark_file
            .as_deref()
            .unwrap_or(self.layout.format().mark_file_name());
        self.layout.directory().join(name)
    }

    /// Analyze the recording and write the mark file.
    ///
    /// # Errors
    ///
    /// Returns [`CutmarksError::Cancelled`] if the cancellation token fired;
    /// no marks are written then. I/O errors reading segments or writing
    /// the mark file are propagated.
    pub fn run(&mut self) -> Result<AnalysisSummary, CutmarksError> {
        self.notify(NotifyEvent::Started {
            title: self.title.clone(),
        });
        let result = self.analyze();
        let title = self.title.clone();
        match &result {
            Ok(_) => self.notify(NotifyEvent::Finished { title }),
            Err(error) => {
                debug!("analysis ended: {error}");
                self.notify(NotifyEvent::Aborted { title });
            }
        }
        result
    }

    fn notify(&self, event: NotifyEvent) {
        if let Some(notifier) = &self.options.notifier {
            notifier.notify(event);
        }
    }

    fn analyze(&mut self) -> Result<AnalysisSummary, CutmarksError> {
        let started = Instant::now();
        let mark_file = MarkFile::new(self.mark_file_path(), self.options.mark_format);
        if self.options.backup_marks && mark_file.backup()? {
            info!("saved previous marks to {}", mark_file.backup_path().display());
        }
        let index = IndexFile::new(self.layout.index_path(), self.layout.format());
        let mut waiter = IndexWaiter::new(index.clone(), self.options.index_wait);

        let mut pass = FirstPass::new(self);
        let outcome = pass.run(self, &mark_file, &mut waiter);
        self.decoder = pass.decoder.take();
        outcome?;

        let FirstPass {
            mut engine,
            frame_count,
            last_iframe,
            ..
        } = pass;
        engine.add_stop_mark(&mut self.context, last_iframe);
        engine.rate_marks(&self.context);

        if self.options.overlap {
            self.search_overlaps(&mut engine)?;
        }
        if self.options.cancellation.is_cancelled() {
            return Err(CutmarksError::Cancelled);
        }

        let fps = effective_fps(&self.context);
        let marks = engine.into_marks();
        mark_file.save(&marks, fps)?;
        info!("wrote {} marks to {}", marks.len(), mark_file.path().display());

        let mut report = validate_context(&self.context, frame_count);
        report.merge(validate_marks(
            &index,
            &marks,
            self.context.video.codec,
            self.options.regenerate_index,
        ));
        for warning in &report.warnings {
            warn!("{warning}");
        }
        for problem in &report.errors {
            error!("{problem}");
        }

        let summary = AnalysisSummary {
            marks,
            report,
            frames: frame_count,
            frames_per_second: fps,
            mark_file: mark_file.path().to_path_buf(),
            elapsed: started.elapsed(),
            index_wait: waiter.waited(),
        };
        let secs = summary.elapsed.as_secs_f64();
        info!(
            "analyzed {} frames in {secs:.1}s ({:.1} fps, {:.1}x realtime)",
            summary.frames,
            if secs > 0.0 { summary.frames as f64 / secs } else { 0.0 },
            summary.realtime_factor().unwrap_or_default()
        );
        Ok(summary)
    }

    fn video_demux(&self) -> Demux {
        match self.video_source {
            VideoSource::Transport(pid) => Demux::transport(pid, PayloadKind::Video),
            VideoSource::Program => Demux::program(PesStream::Video, PayloadKind::Video),
        }
    }

    fn audio_demux(&self) -> Option<Demux> {
        match (self.layout.format(), self.ac3_pid) {
            (RecordingFormat::TransportStream, Some(pid)) => {
                Some(Demux::transport(pid, PayloadKind::Audio))
            }
            (RecordingFormat::TransportStream, None) => None,
            (RecordingFormat::Vdr, _) => Some(Demux::program(PesStream::Ac3, PayloadKind::Audio)),
        }
    }

    fn logo_detector(&self) -> LogoDetector {
        let detector = LogoDetector::new(&self.options.logo_directory, Some(self.codec));
        match self.options.logo_extraction {
            Some(request) => detector.with_extraction(LogoExtraction {
                corner: request.corner,
                width: request.width,
                height: request.height,
                output: self.options.extraction_output.clone(),
            }),
            None => detector,
        }
    }

    // ── Overlap search ─────────────────────────────────────────────

    /// Re-read the recording and look for repeated material around every
    /// ad block of the timeline.
    fn search_overlaps(&mut self, engine: &mut MarkEngine) -> Result<(), CutmarksError> {
        let blocks = AdBlock::from_marks(engine.marks());
        if blocks.is_empty() {
            debug!("no ad blocks, overlap search skipped");
            return Ok(());
        }
        let Some(mut decoder) = self.decoder.take() else {
            debug!("no decoder, overlap search skipped");
            return Ok(());
        };
        decoder.reset();
        let window = (OVERLAP_WINDOW_SECS * effective_fps(&self.context)) as u64;
        let result = self.scan_overlaps(decoder.as_mut(), OverlapScan::new(blocks, window));
        self.decoder = Some(decoder);

        for (block, found) in result? {
            let Some(OverlapPosition { before, after }) = found else {
                continue;
            };
            if before >= block.stop || after <= block.start {
                continue;
            }
            engine.relocate(block.stop, before, MarkReason::OverlapBefore { frame: before });
            engine.relocate(block.start, after, MarkReason::OverlapAfter { frame: after });
        }
        Ok(())
    }

    fn scan_overlaps(
        &self,
        decoder: &mut dyn FrameDecoder,
        mut scan: OverlapScan,
    ) -> Result<Vec<(AdBlock, Option<OverlapPosition>)>, CutmarksError> {
        let blocks = scan.blocks().to_vec();
        let mut context = self.context.clone();
        let parser = HeaderParser::new(self.codec);
        let mut demux = self.video_demux();
        let mut tracker = ProgressTracker::new(
            self.options.progress.clone(),
            OperationType::OverlapSearch,
            Some(self.layout.total_size()),
            self.options.batch_size,
        );
        let mut frame_count = 0u64;
        let mut buffer = vec![0u8; CHUNK_SIZE];

        let mut feed_units = |units: Vec<Vec<u8>>, frame_count: &mut u64, scan: &mut OverlapScan| {
            for unit in units {
                if let Some(VideoHeader::Picture(_)) = parser.find_video_info(&mut context, &unit) {
                    *frame_count += 1;
                    decoder.configure(&context.video);
                }
                if let Some(picture) = decoder.decode_video(&unit) {
                    scan.feed(frame_count.saturating_sub(1), || Histogram::of_luma(&picture));
                }
            }
        };

        'segments: for segment in self.layout.segments() {
            let mut file = File::open(&segment)?;
            loop {
                let read = file.read(&mut buffer)?;
                if read == 0 {
                    break;
                }
                feed_units(demux.push(&buffer[..read]), &mut frame_count, &mut scan);
                tracker.advance(read as u64, frame_count);
                if self.options.cancellation.is_cancelled() {
                    return Err(CutmarksError::Cancelled);
                }
                if scan.is_done() {
                    break 'segments;
                }
            }
        }
        if !scan.is_done() {
            feed_units(demux.finish(), &mut frame_count, &mut scan);
        }
        tracker.finish(frame_count);
        Ok(blocks.into_iter().zip(scan.finish()).collect())
    }
}

fn build_context(info: &RecordingInfo, options: &AnalysisOptions) -> StreamContext {
    let mut context = StreamContext {
        broadcast: BroadcastInfo {
            channel_id: info.channel_id.clone(),
            title: info.title.clone(),
            aspect_ratio: info.aspect_ratio.unwrap_or_default(),
            length_secs: info.length_secs,
        },
        decode_video: options.decode_video && !info.disable_video_decoding,
        decode_audio: options.decode_audio && !info.disable_ac3,
        ..StreamContext::default()
    };
    if info.channel_id.is_none() {
        warn!("no channel id in info file, logo detection and timers disabled");
        context.ignore_logo_detection = true;
        return context;
    }
    context.timers = if options.pre_roll_secs.is_some() || options.post_roll_secs.is_some() {
        RecordingTimers {
            pre_roll_secs: options.pre_roll_secs.unwrap_or_default(),
            post_roll_secs: options.post_roll_secs.unwrap_or_default(),
        }
    } else {
        info.timers.unwrap_or_default()
    };
    if info.disable_video_decoding {
        info!("multichannel audio announced, video decoding disabled");
    }
    if info.disable_ac3 {
        info!("stereo audio announced, AC3 analysis disabled");
    }
    context
}

// ── First pass ─────────────────────────────────────────────────────

/// State of the pass over all segments.
struct FirstPass {
    engine: MarkEngine,
    parser: HeaderParser,
    video_demux: Demux,
    audio_demux: Option<Demux>,
    video: VideoAnalyzer,
    channels: ChannelDetector,
    decoder: Option<Box<dyn FrameDecoder>>,
    frame_dump: Option<PathBuf>,
    vdr: bool,
    frame_count: u64,
    iframe: u64,
    last_iframe: u64,
    reported_ac3: bool,
    waiting: bool,
}

impl FirstPass {
    fn new(analyzer: &mut Analyzer) -> Self {
        Self {
            engine: MarkEngine::new(analyzer.context.timers),
            parser: HeaderParser::new(analyzer.codec),
            video_demux: analyzer.video_demux(),
            audio_demux: analyzer.audio_demux(),
            video: VideoAnalyzer::new(analyzer.logo_detector()),
            channels: ChannelDetector::new(),
            decoder: analyzer.decoder.take(),
            frame_dump: analyzer.options.frame_dump.clone(),
            vdr: analyzer.layout.format() == RecordingFormat::Vdr,
            frame_count: 0,
            iframe: 0,
            last_iframe: 0,
            reported_ac3: false,
            waiting: true,
        }
    }

    fn run(
        &mut self,
        analyzer: &mut Analyzer,
        mark_file: &MarkFile,
        waiter: &mut IndexWaiter,
    ) -> Result<(), CutmarksError> {
        let options = analyzer.options.clone();
        let mut tracker = ProgressTracker::new(
            options.progress.clone(),
            OperationType::Analysis,
            Some(analyzer.layout.total_size()),
            options.batch_size,
        );
        let mut buffer = vec![0u8; CHUNK_SIZE];

        'segments: for segment in analyzer.layout.segments() {
            self.wait_for_index(&analyzer.context, mark_file, waiter, &options)?;
            debug!("processing {}", segment.display());
            let mut file = File::open(&segment)?;
            loop {
                let read = file.read(&mut buffer)?;
                if read == 0 {
                    break;
                }
                self.process_chunk(&mut analyzer.context, &buffer[..read]);
                tracker.advance(read as u64, self.frame_count);

                if self.engine.fast_exit() {
                    info!("broadcast end passed, stopping early");
                    break 'segments;
                }
                if options.cancellation.is_cancelled() {
                    return Err(CutmarksError::Cancelled);
                }
                self.wait_for_index(&analyzer.context, mark_file, waiter, &options)?;
            }
        }
        if !self.engine.fast_exit() {
            self.flush(&mut analyzer.context);
        }
        tracker.finish(self.frame_count);
        Ok(())
    }

    fn wait_for_index(
        &mut self,
        context: &StreamContext,
        mark_file: &MarkFile,
        waiter: &mut IndexWaiter,
        options: &AnalysisOptions,
    ) -> Result<(), CutmarksError> {
        if !self.waiting {
            return Ok(());
        }
        let fps = effective_fps(context);
        let engine = &self.engine;
        let status = waiter.wait_for(self.frame_count, &options.cancellation, || {
            if let Err(error) = mark_file.save(engine.marks(), fps) {
                warn!("cannot save intermediate marks: {error}");
            }
        });
        match status {
            IndexStatus::Cancelled => return Err(CutmarksError::Cancelled),
            IndexStatus::GaveUp => self.waiting = false,
            IndexStatus::Ready | IndexStatus::Unavailable | IndexStatus::Stale => {}
        }
        Ok(())
    }

    fn process_chunk(&mut self, context: &mut StreamContext, data: &[u8]) {
        for unit in self.video_demux.push(data) {
            self.handle_video_unit(context, &unit);
        }
        if let Some(audio) = &mut self.audio_demux {
            let units = audio.push(data);
            for unit in units {
                self.handle_audio_unit(context, &unit);
            }
        }
    }

    /// Hand the units still buffered at the end of the recording to the
    /// detectors.
    fn flush(&mut self, context: &mut StreamContext) {
        for unit in self.video_demux.finish() {
            self.handle_video_unit(context, &unit);
        }
        if let Some(audio) = &mut self.audio_demux {
            let units = audio.finish();
            for unit in units {
                self.handle_audio_unit(context, &unit);
            }
        }
    }

    fn handle_video_unit(&mut self, context: &mut StreamContext, unit: &[u8]) {
        let header = self.parser.find_video_info(context, unit);
        let is_picture = matches!(header, Some(VideoHeader::Picture(_)));
        if let Some(VideoHeader::Picture(picture_type)) = header {
            self.count_picture(context, picture_type);
        }
        if self.frame_count == 0 {
            return;
        }

        let mut picture = None;
        let mut analyze = is_picture;
        if context.decode_video
            && let Some(decoder) = self.decoder.as_deref_mut()
        {
            if is_picture {
                decoder.configure(&context.video);
            }
            picture = decoder.decode_video(unit);
            analyze = picture.is_some();
        }
        if let Some(hint) = picture.as_ref().and_then(|frame| frame.aspect_hint)
            && hint.is_known()
        {
            context.video.aspect_ratio = hint;
        }
        if !analyze || self.frame_count - self.iframe > MAX_IFRAME_DISTANCE {
            return;
        }
        if let Some(frame) = &picture {
            self.dump_frame(frame);
        }

        for mark in self
            .video
            .process(context, picture.as_ref(), self.last_iframe, self.iframe)
        {
            self.engine.add_mark(context, mark);
        }
    }

    fn count_picture(&mut self, context: &mut StreamContext, picture_type: PictureType) {
        self.frame_count += 1;
        if picture_type == PictureType::I {
            self.last_iframe = self.iframe;
            self.iframe = self.frame_count - 1;
        }
        if self.frame_count != 1 {
            return;
        }
        info!(
            "{}{} video",
            if context.is_hd() { "HD" } else { "SD" },
            if context.video.interlaced {
                " interlaced"
            } else {
                ""
            }
        );
        if context.fps() <= 0.0 {
            info!("frame rate unknown, assuming {FALLBACK_FPS} fps");
        }
        self.engine.add_start_mark(context);
    }

    fn handle_audio_unit(&mut self, context: &mut StreamContext, unit: &[u8]) {
        if !context.decode_audio || self.parser.find_ac3_info(context, unit).is_none() {
            return;
        }
        if self.vdr && !self.reported_ac3 {
            info!("found AC3");
            self.reported_ac3 = true;
        }
        if let Some(mark) = self.channels.process(context, self.last_iframe) {
            self.engine.add_mark(context, mark);
        }
    }

    fn dump_frame(&self, frame: &DecodedFrame) {
        let Some(directory) = &self.frame_dump else {
            return;
        };
        let Some(image) = frame.luma_image() else {
            return;
        };
        let path = directory.join(format!("frame-{:07}.png", self.iframe));
        if let Err(error) = image.save(&path) {
            warn!("cannot write {}: {error}", path.display());
        }
    }
}
