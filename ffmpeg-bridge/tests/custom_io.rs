mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::Bytes;
use common::{Fixture, Sink};
use ffmpeg_bridge::{
    Error, InputContext, IoBridge, IoBridgeBuilder, OutputContext, OutputState, media, release,
};

fn remux_to_sink(fixture: &Fixture, interleaved: bool) -> anyhow::Result<(Sink, usize)> {
    let mut input = InputContext::open(&fixture.input)?;
    let sink = Sink::default();

    let mut output = OutputContext::with_format_name("", "mpegts")?;
    output.set_io(IoBridge::from_writer(sink.clone())?)?;
    output.set_interleaved(interleaved);
    {
        let source = input.best_stream(media::Type::Video)?;
        let mut cc = source.codec_ctx()?;
        output.add_stream_with_codec_ctx(&mut cc)?;
        release(&mut cc);
    }
    output.write_header()?;

    let mut count = 0;
    for mut packet in input.packets() {
        output.write_packet(&mut packet)?;
        release(&mut packet);
        count += 1;
    }
    assert!(input.last_error().is_none());

    output.write_trailer()?;
    assert_eq!(output.state(), OutputState::TrailerWritten);
    assert!(output.write_trailer().is_err());
    output.close_and_release();
    input.close_and_release();
    Ok((sink, count))
}

/// A reader over `data` that serves it in chunks of at most `wanted` bytes.
fn reading(data: Vec<u8>) -> IoBridgeBuilder {
    let mut cursor = 0;
    IoBridge::builder().buffer_size(4096).reader(move |wanted| {
        let end = (cursor + wanted).min(data.len());
        let chunk = Bytes::copy_from_slice(&data[cursor..end]);
        cursor = end;
        Ok(chunk)
    })
}

#[test]
fn test_custom_writer_round_trip() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let (sink, written) = remux_to_sink(&fixture, false)?;
    assert_eq!(written as i64, common::FRAMES);

    let data = sink.bytes();
    assert!(!data.is_empty());
    // 188-byte transport packets, each starting with the sync byte
    assert_eq!(data.len() % 188, 0);
    assert!(data.chunks(188).all(|chunk| chunk[0] == 0x47));

    let io = reading(data).build()?;
    let mut reread = InputContext::open_with_io(io, "mpegts")?;
    assert_eq!(reread.format_name(), "mpegts");
    {
        let stream = reread.best_stream(media::Type::Video)?;
        assert_eq!((stream.width(), stream.height()), (common::WIDTH, common::HEIGHT));
    }

    let total: usize = reread.packets().map(|p| p.size()).sum();
    assert!(total > 0);
    assert!(reread.last_error().is_none());
    Ok(())
}

#[test]
fn test_interleaved_writer() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let (plain, _) = remux_to_sink(&fixture, false)?;
    let (interleaved, _) = remux_to_sink(&fixture, true)?;
    // a single stream interleaves to the same byte sequence
    assert_eq!(plain.bytes().len(), interleaved.bytes().len());
    Ok(())
}

#[test]
fn test_writer_failure_is_reported() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let mut input = InputContext::open(&fixture.input)?;

    let mut output = OutputContext::with_format_name("", "mpegts")?;
    let io = IoBridge::builder()
        .buffer_size(188)
        .writer(|_| Err(std::io::Error::other("pipe closed")))
        .build()?;
    output.set_io(io)?;
    output.add_stream_from(&input.best_stream(media::Type::Video)?)?;

    // mpegts flushes tables on the header; the failure may surface there or on the first packets
    let mut failed = output.write_header().is_err();
    if !failed {
        for mut packet in input.packets() {
            if output.write_packet(&mut packet).is_err() {
                failed = true;
                break;
            }
        }
    }
    assert!(failed);
    output.close_and_release();
    Ok(())
}

#[test]
fn test_input_bridge_with_writer_reads() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let (sink, _) = remux_to_sink(&fixture, false)?;

    let writes = Arc::new(AtomicUsize::new(0));
    let writes_clone = writes.clone();
    let io = reading(sink.bytes())
        .writer(move |_| {
            writes_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build()?;
    assert!(io.can_read() && io.can_write());

    let mut reread = InputContext::open_with_io(io, "mpegts")?;
    {
        let stream = reread.best_stream(media::Type::Video)?;
        assert_eq!((stream.width(), stream.height()), (common::WIDTH, common::HEIGHT));
    }
    let count = reread.packets().filter(|p| p.size() > 0).count();
    assert!(count > 0);
    assert!(reread.last_error().is_none());
    reread.close_and_release();
    assert_eq!(writes.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn test_trailer_failure_is_returned() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let mut input = InputContext::open(&fixture.input)?;

    let broken = Arc::new(AtomicBool::new(false));
    let broken_clone = broken.clone();
    let writes = Arc::new(AtomicUsize::new(0));
    let writes_clone = writes.clone();
    let io = IoBridge::builder()
        .writer(move |_| {
            writes_clone.fetch_add(1, Ordering::SeqCst);
            if broken_clone.load(Ordering::SeqCst) {
                Err(std::io::Error::other("pipe closed"))
            } else {
                Ok(())
            }
        })
        .build()?;

    let mut output = OutputContext::with_format_name("", "mpegts")?;
    output.set_io(io)?;
    output.add_stream_from(&input.best_stream(media::Type::Video)?)?;
    output.write_header()?;
    for mut packet in input.packets() {
        output.write_packet(&mut packet)?;
        release(&mut packet);
    }

    // the last PES packet and the buffered tail only leave on the trailer
    broken.store(true, Ordering::SeqCst);
    match output.write_trailer() {
        Err(Error::IoBridge(message)) => assert!(message.contains("pipe closed")),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(output.state(), OutputState::TrailerWritten);

    // closing does not write the trailer again
    let seen = writes.load(Ordering::SeqCst);
    output.close_and_release();
    assert_eq!(writes.load(Ordering::SeqCst), seen);
    assert_eq!(output.state(), OutputState::Closed);
    Ok(())
}
