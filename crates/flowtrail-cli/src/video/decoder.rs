use ffmpeg_next as ffmpeg;
use std::path::Path;

use flowtrail_engine::{CapturedFrame, FrameSource, SourceError};
use image::RgbImage;

use crate::errors::{CliError, Result};

/// Streaming video decoder using FFmpeg; frames are decoded on demand.
pub struct VideoDecoder {
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    stream_index: usize,
    width: u32,
    height: u32,
    frame_rate: f64,
    eof_sent: bool,
    next_index: u64,
}

impl VideoDecoder {
    /// Initialize FFmpeg (call once at program start)
    pub fn init() -> Result<()> {
        ffmpeg::init()
            .map_err(|e| CliError::VideoDecoding(format!("Failed to initialize FFmpeg: {}", e)))
    }

    /// Open a video file and prepare its best video stream for decoding
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let input = ffmpeg::format::input(&path).map_err(|e| {
            CliError::InputNotFound(format!("{}: {}", path.as_ref().display(), e))
        })?;

        let video_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| CliError::VideoDecoding("No video stream found".to_string()))?;
        let stream_index = video_stream.index();

        let video_codec_context =
            ffmpeg::codec::context::Context::from_parameters(video_stream.parameters()).map_err(
                |e| CliError::VideoDecoding(format!("Failed to create codec context: {}", e)),
            )?;
        let decoder = video_codec_context
            .decoder()
            .video()
            .map_err(|e| CliError::VideoDecoding(format!("Failed to create decoder: {}", e)))?;

        let width = decoder.width();
        let height = decoder.height();
        let frame_rate = video_stream.avg_frame_rate();
        let frame_rate_f64 = if frame_rate.denominator() == 0 {
            0.0
        } else {
            frame_rate.numerator() as f64 / frame_rate.denominator() as f64
        };

        let scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg::format::Pixel::RGB24,
            width,
            height,
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| CliError::VideoDecoding(format!("Failed to create scaler: {}", e)))?;

        log::info!(
            "Opened video: {}x{} @ {:.2} fps",
            width,
            height,
            frame_rate_f64
        );

        Ok(Self {
            input,
            decoder,
            scaler,
            stream_index,
            width,
            height,
            frame_rate: frame_rate_f64,
            eof_sent: false,
            next_index: 0,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn receive_frame(&mut self) -> std::result::Result<Option<RgbImage>, SourceError> {
        let mut decoded = ffmpeg::frame::Video::empty();
        match self.decoder.receive_frame(&mut decoded) {
            Ok(()) => {
                let mut rgb_frame = ffmpeg::frame::Video::empty();
                self.scaler
                    .run(&decoded, &mut rgb_frame)
                    .map_err(|e| self.decode_error(format!("Failed to scale frame: {}", e)))?;

                // Rows may be padded past width * 3.
                let stride = rgb_frame.stride(0);
                let row_bytes = self.width as usize * 3;
                let data = rgb_frame.data(0);
                let mut pixels = Vec::with_capacity(row_bytes * self.height as usize);
                for row in data.chunks(stride).take(self.height as usize) {
                    pixels.extend_from_slice(&row[..row_bytes.min(row.len())]);
                }
                RgbImage::from_raw(self.width, self.height, pixels)
                    .map(Some)
                    .ok_or_else(|| self.decode_error("Decoded frame is truncated".to_string()))
            }
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(ffmpeg::Error::Other {
                errno: ffmpeg::error::EAGAIN,
            }) => Ok(None),
            Err(e) => Err(self.decode_error(format!("Failed to receive frame: {}", e))),
        }
    }

    fn decode_error(&self, message: String) -> SourceError {
        SourceError::Decode {
            index: self.next_index,
            message,
        }
    }
}

impl FrameSource for VideoDecoder {
    fn next_frame(&mut self) -> std::result::Result<Option<CapturedFrame>, SourceError> {
        loop {
            if let Some(image) = self.receive_frame()? {
                let index = self.next_index;
                self.next_index += 1;
                return Ok(Some(CapturedFrame { index, image }));
            }
            if self.eof_sent {
                return Ok(None);
            }

            let packet = self
                .input
                .packets()
                .find(|(stream, _)| stream.index() == self.stream_index)
                .map(|(_, packet)| packet);
            match packet {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .map_err(|e| self.decode_error(format!("Failed to send packet: {}", e)))?,
                None => {
                    // Flush decoder
                    self.decoder
                        .send_eof()
                        .map_err(|e| self.decode_error(format!("Failed to send EOF: {}", e)))?;
                    self.eof_sent = true;
                }
            }
        }
    }
}
