use std::{
    sync::{mpsc, Arc},
    thread::{self, JoinHandle},
};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, Device, FromSample, Host, SampleRate, SizedSample, Stream, StreamConfig,
    SupportedBufferSize,
};
use tracing::{debug, error, info, warn};

use super::{AudioDriver, DriverEvents, DriverInfo};
use crate::{
    audio::{
        consumer::{CycleInfo, HardwareCallbackConsumer},
        CHANNEL_COUNT,
    },
    config::{AudioSettings, SampleFormat},
    error::DriverError,
};

/// Native buffer size assumed until the first callback reports the real one.
pub const DEFAULT_NATIVE_BUFFER_SIZE: u32 = 512;

enum Command {
    BufferSizeChanged(u32),
    DeviceLost,
    Stop,
}

#[derive(Clone)]
struct StreamTarget {
    host_name: String,
    device_name: String,
    cfg: StreamConfig,
    sample_format: cpal::SampleFormat,
}

struct OutputThread {
    commands: mpsc::Sender<Command>,
    handle: JoinHandle<()>,
}

/// cpal output backend.
///
/// cpal streams cannot leave the thread that built them, so the stream lives
/// on a dedicated output thread. That thread also delivers buffer-size
/// changes and device loss to the stream, away from the callback thread.
#[derive(Default)]
pub struct CpalDriver {
    target: Option<StreamTarget>,
    output: Option<OutputThread>,
}

impl AudioDriver for CpalDriver {
    fn name(&self) -> &str {
        "cpal"
    }

    fn open(&mut self, settings: &AudioSettings) -> Result<DriverInfo, DriverError> {
        let host = match &settings.host {
            Some(name) => find_host(name).ok_or_else(|| DriverError::HostNotFound(name.clone()))?,
            None => cpal::default_host(),
        };
        let device = match &settings.device {
            Some(name) => find_output_device(&host, name)
                .ok_or_else(|| DriverError::DeviceNotFound(name.clone()))?,
            None => host
                .default_output_device()
                .ok_or(DriverError::NoDefaultDevice)?,
        };
        let device_name = device.name().unwrap_or_else(|_| "<unnamed>".into());
        let default_cfg = device
            .default_output_config()
            .map_err(|_| DriverError::NoDefaultConfig)?;
        let sample_format = match settings.sample_format {
            SampleFormat::Auto => default_cfg.sample_format(),
            SampleFormat::F32 => cpal::SampleFormat::F32,
            SampleFormat::I16 => cpal::SampleFormat::I16,
        };
        let chunk_len = settings.latency.chunk_len;
        let native_buffer_size = if chunk_len > 0 {
            chunk_len
        } else {
            native_buffer_size_of(default_cfg.buffer_size())
        };
        let cfg = StreamConfig {
            channels: CHANNEL_COUNT as u16,
            sample_rate: SampleRate(settings.sample_rate),
            buffer_size: if chunk_len > 0 {
                BufferSize::Fixed(chunk_len)
            } else {
                BufferSize::Default
            },
        };
        info!(
            "cpal output: host {}, device {device_name}, {sample_format} @ {} Hz",
            host.id().name(),
            settings.sample_rate
        );
        self.target = Some(StreamTarget {
            host_name: host.id().name().to_owned(),
            device_name,
            cfg,
            sample_format,
        });
        Ok(DriverInfo {
            native_buffer_size,
            realtime: true,
        })
    }

    fn start(
        &mut self,
        consumer: HardwareCallbackConsumer,
        events: Arc<dyn DriverEvents>,
    ) -> Result<(), DriverError> {
        let target = self.target.clone().ok_or(DriverError::NotOpen)?;
        self.output = Some(spawn_output_thread(target, consumer, events)?);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(output) = self.output.take() {
            debug!("Stopping cpal output");
            _ = output.commands.send(Command::Stop);
            let on_output_thread = output.handle.thread().id() == thread::current().id();
            if !on_output_thread && output.handle.join().is_err() {
                error!("cpal output thread panicked");
            }
            debug!("cpal output stopped");
        }
        self.target = None;
    }
}

impl Drop for CpalDriver {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_output_thread(
    target: StreamTarget,
    consumer: HardwareCallbackConsumer,
    events: Arc<dyn DriverEvents>,
) -> Result<OutputThread, DriverError> {
    let (commands, command_rx) = mpsc::channel();
    let (ready_tx, ready_rx) = mpsc::channel();
    let callback_commands = commands.clone();
    let handle = thread::Builder::new()
        .name("audio-output".into())
        .spawn(move || {
            let stream = match build_stream(&target, consumer, callback_commands) {
                Ok(stream) => stream,
                Err(e) => {
                    _ = ready_tx.send(Err(e));
                    return;
                }
            };
            _ = ready_tx.send(Ok(()));
            while let Ok(command) = command_rx.recv() {
                match command {
                    Command::BufferSizeChanged(size) => events.buffer_size_changed(size),
                    Command::DeviceLost => events.device_shutdown(),
                    Command::Stop => break,
                }
            }
            drop(stream);
        })?;
    match ready_rx.recv() {
        Ok(Ok(())) => Ok(OutputThread { commands, handle }),
        Ok(Err(e)) => {
            _ = handle.join();
            Err(e)
        }
        Err(_) => Err(DriverError::ConnectionFailed(
            "cpal output thread exited early".into(),
        )),
    }
}

fn build_stream(
    target: &StreamTarget,
    consumer: HardwareCallbackConsumer,
    commands: mpsc::Sender<Command>,
) -> Result<Stream, DriverError> {
    let host = find_host(&target.host_name)
        .ok_or_else(|| DriverError::HostNotFound(target.host_name.clone()))?;
    let device = find_output_device(&host, &target.device_name)
        .ok_or_else(|| DriverError::DeviceNotFound(target.device_name.clone()))?;
    create_stream_dispatched(target.sample_format, &device, &target.cfg, consumer, commands)
}

fn create_stream_dispatched(
    sample_format: cpal::SampleFormat,
    device: &Device,
    cfg: &StreamConfig,
    consumer: HardwareCallbackConsumer,
    commands: mpsc::Sender<Command>,
) -> Result<Stream, DriverError> {
    match sample_format {
        cpal::SampleFormat::I8 => create_stream::<i8>(device, cfg, consumer, commands),
        cpal::SampleFormat::I16 => create_stream::<i16>(device, cfg, consumer, commands),
        cpal::SampleFormat::I32 => create_stream::<i32>(device, cfg, consumer, commands),
        cpal::SampleFormat::I64 => create_stream::<i64>(device, cfg, consumer, commands),
        cpal::SampleFormat::U8 => create_stream::<u8>(device, cfg, consumer, commands),
        cpal::SampleFormat::U16 => create_stream::<u16>(device, cfg, consumer, commands),
        cpal::SampleFormat::U32 => create_stream::<u32>(device, cfg, consumer, commands),
        cpal::SampleFormat::U64 => create_stream::<u64>(device, cfg, consumer, commands),
        cpal::SampleFormat::F32 => create_stream::<f32>(device, cfg, consumer, commands),
        cpal::SampleFormat::F64 => create_stream::<f64>(device, cfg, consumer, commands),
        f => Err(DriverError::UnsupportedSampleFormat(f.to_string())),
    }
}

fn create_stream<T>(
    device: &Device,
    cfg: &StreamConfig,
    mut consumer: HardwareCallbackConsumer,
    commands: mpsc::Sender<Command>,
) -> Result<Stream, DriverError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = cfg.channels as usize;
    let mut last_buffer_size = 0u32;
    let error_commands = commands.clone();
    let err_fn = move |err: cpal::StreamError| {
        error!("An error occurred on stream: {}", err);
        if let cpal::StreamError::DeviceNotAvailable = err {
            _ = error_commands.send(Command::DeviceLost);
        }
    };

    let stream = device.build_output_stream(
        cfg,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let buffer_size = (data.len() / channels) as u32;
            if buffer_size != last_buffer_size {
                if last_buffer_size != 0 {
                    _ = commands.send(Command::BufferSizeChanged(buffer_size));
                }
                last_buffer_size = buffer_size;
            }
            let cycle = CycleInfo {
                buffer_size,
                frames_since_cycle_start: 0,
            };
            consumer.process(data, channels, cycle);
        },
        err_fn,
        None,
    )?;
    stream.play()?;
    Ok(stream)
}

fn native_buffer_size_of(range: &SupportedBufferSize) -> u32 {
    match range {
        SupportedBufferSize::Range { min, max } => DEFAULT_NATIVE_BUFFER_SIZE.clamp(*min, *max),
        SupportedBufferSize::Unknown => {
            warn!("Device doesn't report its buffer size range");
            DEFAULT_NATIVE_BUFFER_SIZE
        }
    }
}

fn find_host(host_name: &str) -> Option<Host> {
    let host_id = cpal::available_hosts()
        .into_iter()
        .find(|host| host.name() == host_name)?;
    cpal::host_from_id(host_id).ok()
}

fn find_output_device(host: &Host, device_name: &str) -> Option<Device> {
    host.output_devices().ok()?.find(|device| {
        if let Ok(name) = device.name() {
            name == device_name
        } else {
            false
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_size_respects_device_range() {
        let small = SupportedBufferSize::Range { min: 64, max: 256 };
        assert_eq!(native_buffer_size_of(&small), 256);
        let wide = SupportedBufferSize::Range { min: 16, max: 4096 };
        assert_eq!(native_buffer_size_of(&wide), DEFAULT_NATIVE_BUFFER_SIZE);
        assert_eq!(
            native_buffer_size_of(&SupportedBufferSize::Unknown),
            DEFAULT_NATIVE_BUFFER_SIZE
        );
    }

    #[test]
    fn unknown_host_is_reported() {
        let mut driver = CpalDriver::default();
        let settings = AudioSettings {
            host: Some("no-such-host".into()),
            ..Default::default()
        };
        assert!(matches!(
            driver.open(&settings),
            Err(DriverError::HostNotFound(_))
        ));
    }
}
