//! Streamed synthesis response: delivery task → accumulator → scanner →
//! decoder → sink.
//!
//! The delivery side only forwards body chunks over a bounded channel and never
//! touches JSON. The receiving side owns the accumulator and scan cursor, so
//! the buffer has a single writer and a single reader with no locking.

use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::accumulator::Accumulator;
use crate::audio::{AudioSink, SinkReport};
use crate::backend::{ByteStream, Framing, SynthesisBody};
use crate::error::{PipelineError, Result, Stage};
use crate::frame_decoder::{AudioChunk, DecodeStats, FrameDecoder};
use crate::frame_scanner::FrameScanner;

#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    /// Largest response kept in memory
    pub capacity: usize,
    /// Chunks queued between delivery and parsing
    pub channel_depth: usize,
    /// Longest silence tolerated between two chunks
    pub idle_timeout: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamReport {
    pub received_bytes: usize,
    pub decode: DecodeStats,
    pub playback: SinkReport,
}

/// Consume a synthesis body and push every decoded chunk into `sink`.
///
/// Returns once the connection reports end-of-stream. The sink is neither
/// started nor finished here.
pub async fn receive_stream(
    body: SynthesisBody,
    settings: &StreamSettings,
    sink: &mut AudioSink,
    cancel: &CancellationToken,
) -> Result<StreamReport> {
    let mut acc = Accumulator::with_capacity(settings.capacity)?;
    let mut scanner = FrameScanner::new();
    let mut decoder = FrameDecoder::new();

    let (tx, mut rx) = mpsc::channel(settings.channel_depth.max(1));
    let delivery_cancel = cancel.child_token();
    // stops the delivery task on every exit path
    let _delivery_guard = delivery_cancel.clone().drop_guard();
    tokio::spawn(deliver(body.stream, tx, delivery_cancel));

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            next = tokio::time::timeout(settings.idle_timeout, rx.recv()) => next,
        };

        let chunk = match next {
            Err(_) => {
                return Err(PipelineError::Timeout {
                    stage: Stage::Synthesize,
                    after: settings.idle_timeout,
                });
            }
            Ok(None) => break,
            Ok(Some(chunk)) => chunk?,
        };

        acc.append(&chunk)?;

        if body.framing == Framing::EventStream {
            while let Some(frame) = scanner.next_frame(acc.as_bytes()) {
                if let Some(audio) = decoder.decode(acc.slice(frame.range())) {
                    push(sink, audio, cancel).await?;
                }
            }
        }
    }

    let tail = match body.framing {
        Framing::EventStream => scanner.finish(acc.as_bytes()).map(|frame| frame.range()),
        Framing::Document => Some(0..acc.len()),
    };
    if let Some(range) = tail {
        if let Some(audio) = decoder.decode(acc.slice(range)) {
            push(sink, audio, cancel).await?;
        }
    }

    let decode = decoder.stats();
    log::info!(
        "Synthesis stream ended: {} bytes, {} frames, {} audio chunks, {} skipped",
        acc.len(),
        decode.frames,
        decode.chunks,
        decode.skipped
    );
    Ok(StreamReport {
        received_bytes: acc.len(),
        decode,
        playback: SinkReport::default(),
    })
}

/// A full player pipe must not hold up cancellation.
async fn push(sink: &mut AudioSink, audio: AudioChunk, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        pushed = sink.push(audio) => pushed,
    }
}

/// Network side: forward body chunks until end-of-stream, error or cancel.
async fn deliver(mut stream: ByteStream, tx: mpsc::Sender<Result<Bytes>>, cancel: CancellationToken) {
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = stream.next() => item,
        };
        let Some(item) = item else {
            break;
        };
        let failed = item.is_err();
        if tx.send(item).await.is_err() || failed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioEncoding, AudioFormat, PlaybackBackend, RecordingPlayback};
    use crate::config::PlaybackMode;
    use async_trait::async_trait;
    use futures_util::stream;

    /// Output whose writes never complete, like a player that stopped reading.
    struct StalledPlayback;

    #[async_trait]
    impl PlaybackBackend for StalledPlayback {
        async fn configure(&mut self, _format: &AudioFormat) -> anyhow::Result<()> {
            Ok(())
        }

        async fn set_mute(&mut self, _mute: bool) -> anyhow::Result<()> {
            Ok(())
        }

        async fn write(&mut self, _data: &[u8]) -> anyhow::Result<()> {
            std::future::pending().await
        }

        async fn drain(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn settings(capacity: usize) -> StreamSettings {
        StreamSettings {
            capacity,
            channel_depth: 4,
            idle_timeout: Duration::from_millis(200),
        }
    }

    fn sink(recorder: &RecordingPlayback) -> AudioSink {
        let format = AudioFormat {
            sample_rate: 16000,
            bits_per_sample: 16,
            channels: 1,
            encoding: AudioEncoding::Mp3,
        };
        AudioSink::new(PlaybackMode::Stream, Box::new(recorder.clone()), format, "/unused")
    }

    fn body(chunks: Vec<&'static [u8]>, framing: Framing) -> SynthesisBody {
        let items: Vec<Result<Bytes>> = chunks.into_iter().map(|c| Ok(Bytes::from_static(c))).collect();
        SynthesisBody {
            stream: stream::iter(items).boxed(),
            framing,
        }
    }

    #[tokio::test]
    async fn test_frames_split_across_chunks() {
        let recorder = RecordingPlayback::new();
        let mut sink = sink(&recorder);
        let chunks: Vec<&'static [u8]> = vec![
            b"data: {\"data\":{\"au",
            b"dio\":\"0a0b\"}}\n\nda",
            b"ta: {\"data\":{\"audio\":\"\"}}\n\n",
            b"data: {\"data\":{\"audio\":\"ff\"}}",
        ];

        let report = receive_stream(
            body(chunks, Framing::EventStream),
            &settings(1024),
            &mut sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        // the trailing unterminated frame is decoded at end-of-stream
        assert_eq!(recorder.writes(), vec![vec![0x0a, 0x0b], vec![0xff]]);
        assert_eq!(report.decode.frames, 3);
        assert_eq!(report.decode.chunks, 2);
    }

    #[tokio::test]
    async fn test_bad_frames_do_not_stop_the_stream() {
        let recorder = RecordingPlayback::new();
        let mut sink = sink(&recorder);
        let chunks: Vec<&'static [u8]> = vec![
            b"data: {\"data\":{}}\n",
            b"data: {not json\n",
            b"data: {\"data\":{\"audio\":\"xyz\"}}\n",
            b"data: {\"data\":{\"audio\":\"01\"}}\n",
        ];

        let report = receive_stream(
            body(chunks, Framing::EventStream),
            &settings(1024),
            &mut sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(recorder.written(), vec![0x01]);
        assert_eq!(report.decode.skipped, 2);
    }

    #[tokio::test]
    async fn test_overflow_fails_the_stage() {
        let recorder = RecordingPlayback::new();
        let mut sink = sink(&recorder);
        let chunks: Vec<&'static [u8]> = vec![b"data: {\"data\":{\"audio\":\"0a\"}}\n", b"data: {\"data\":{\"audio\":\"0b\"}}\n"];

        let err = receive_stream(
            body(chunks, Framing::EventStream),
            &settings(40),
            &mut sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PipelineError::OverflowDropped { capacity: 40, .. }));
        // nothing from the rejected chunk was decoded
        assert_eq!(recorder.writes(), vec![vec![0x0a]]);
    }

    #[tokio::test]
    async fn test_document_body_is_one_frame() {
        let recorder = RecordingPlayback::new();
        let mut sink = sink(&recorder);
        let chunks: Vec<&'static [u8]> = vec![b"{\"data\":{\"audio\":\"0a", b"0b\",\"status\":2},\"base_resp\":{\"status_code\":0}}"];

        receive_stream(body(chunks, Framing::Document), &settings(1024), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(recorder.writes(), vec![vec![0x0a, 0x0b]]);
    }

    #[tokio::test]
    async fn test_idle_stream_times_out() {
        let recorder = RecordingPlayback::new();
        let mut sink = sink(&recorder);
        let body = SynthesisBody {
            stream: stream::pending().boxed(),
            framing: Framing::EventStream,
        };

        let err = receive_stream(body, &settings(1024), &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Timeout {
                stage: Stage::Synthesize,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cancel_stops_receiving() {
        let recorder = RecordingPlayback::new();
        let mut sink = sink(&recorder);
        let body = SynthesisBody {
            stream: stream::pending().boxed(),
            framing: Framing::EventStream,
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = receive_stream(body, &settings(1024), &mut sink, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn test_transport_error_is_propagated() {
        let recorder = RecordingPlayback::new();
        let mut sink = sink(&recorder);
        let items: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: {\"data\":{\"audio\":\"0a\"}}\n")),
            Err(PipelineError::Playback("connection reset".to_string())),
        ];
        let body = SynthesisBody {
            stream: stream::iter(items).boxed(),
            framing: Framing::EventStream,
        };

        let err = receive_stream(body, &settings(1024), &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(recorder.written(), vec![0x0a]);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_a_stalled_write() {
        let format = AudioFormat {
            sample_rate: 16000,
            bits_per_sample: 16,
            channels: 1,
            encoding: AudioEncoding::Pcm,
        };
        let mut sink = AudioSink::new(PlaybackMode::Stream, Box::new(StalledPlayback), format, "/unused");
        let chunks: Vec<&'static [u8]> = vec![b"data: {\"data\":{\"audio\":\"0a\"}}\n"];
        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            });
        }

        let err = tokio::time::timeout(
            Duration::from_secs(2),
            receive_stream(body(chunks, Framing::EventStream), &settings(1024), &mut sink, &cancel),
        )
        .await
        .expect("cancel must not wait for the write")
        .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }
}
