mod common;

use common::{Fixture, Sink};
use ffmpeg_bridge::{
    CodecContext, CodecFlags, CodecId, Error, InputContext, IoBridge, OutputContext, OutputFormat,
    OutputState, Packet, find_encoder, media, release,
};

#[test]
fn test_ctx_output() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let path = fixture.path("output.mp4");
    let path = path.to_string_lossy();

    let mut by_path = OutputContext::new(&*path)?;
    assert_eq!(by_path.format().name(), "mp4");
    by_path.close_and_release();

    for format in [
        OutputFormat::find("mp4", "", "")?,
        OutputFormat::find("", &path, "")?,
        OutputFormat::find("", "", "video/mp4")?,
    ] {
        let mut ctx = OutputContext::new(format)?;
        assert_eq!(ctx.state(), OutputState::HeaderPending);
        ctx.close_and_release();
    }

    let err = OutputFormat::find("", "", "wrong/mime").unwrap_err();
    assert!(matches!(err, Error::FormatResolution));
    assert_eq!(
        err.to_string(),
        "output format is not initialized. Unable to allocate context"
    );
    assert!(matches!(
        OutputContext::with_mime_type("", "wrong/mime"),
        Err(Error::FormatResolution)
    ));
    Ok(())
}

#[test]
fn test_ctx_close_empty() -> anyhow::Result<()> {
    ffmpeg_bridge::init()?;
    let mut input = InputContext::new()?;
    input.close_and_release();
    release(&mut input);

    let mut output = OutputContext::with_format_name("", "mpegts")?;
    output.close_and_release();
    release(&mut output);
    assert_eq!(output.state(), OutputState::Closed);
    Ok(())
}

#[test]
fn test_new_stream() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let path = fixture.path("dummy.mp4");
    let mut output = OutputContext::new(path.as_path())?;

    let codec = find_encoder(CodecId::MPEG1VIDEO)?;
    let mut cc = CodecContext::new(&codec)?;
    cc.set_time_base((1, 25))?.set_dimensions(320, 200)?;

    assert!(output.is_global_header());
    {
        let stream = output.add_stream_with_codec_ctx(&mut cc)?;
        assert_eq!(stream.index(), 0);
        assert_eq!(stream.medium(), media::Type::Video);
        assert_eq!((stream.width(), stream.height()), (320, 200));
    }

    // the muxer's needs are applied to the caller's codec context
    assert!(cc.has_global_header()?);
    assert_eq!(output.nb_streams(), 1);

    release(&mut cc);
    output.close_and_release();
    Ok(())
}

#[test]
fn test_write_header() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let path = fixture.path("header.mp4");
    let mut output = OutputContext::new(path.as_path())?;

    let codec = find_encoder(CodecId::MPEG1VIDEO)?;
    let mut cc = CodecContext::new(&codec)?;
    cc.set_time_base((1, 25))?
        .set_dimensions(10, 10)?
        .set_flags(CodecFlags::GLOBAL_HEADER)?;
    output.new_stream(&codec)?.set_codec_ctx(&cc)?;

    output.write_header()?;
    assert_eq!(output.state(), OutputState::HeaderWritten);
    assert!(path.exists());

    // exactly once
    assert!(matches!(output.write_header(), Err(Error::HeaderWrite(_))));
    assert!(matches!(
        output.new_stream(&codec),
        Err(Error::InvalidState(_))
    ));

    release(&mut cc);
    output.close_and_release();
    output.close_and_release();
    Ok(())
}

#[test]
fn test_write_header_without_streams() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let path = fixture.path("empty.mp4");
    let mut output = OutputContext::new(path.as_path())?;
    assert!(matches!(output.write_header(), Err(Error::HeaderWrite(_))));
    assert_eq!(output.state(), OutputState::HeaderPending);
    assert!(!path.exists());
    Ok(())
}

#[test]
fn test_write_header_requires_configured_stream() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let path = fixture.path("unconfigured.mp4");
    let mut output = OutputContext::new(path.as_path())?;
    let codec = find_encoder(CodecId::MPEG1VIDEO)?;
    output.new_stream(&codec)?;
    assert!(matches!(output.write_header(), Err(Error::HeaderWrite(_))));
    Ok(())
}

#[test]
fn test_write_header_requires_global_header_flag() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let path = fixture.path("noflag.mp4");
    let mut output = OutputContext::new(path.as_path())?;

    let codec = find_encoder(CodecId::MPEG1VIDEO)?;
    let mut cc = CodecContext::new(&codec)?;
    cc.set_time_base((1, 25))?.set_dimensions(10, 10)?;
    output.new_stream(&codec)?.set_codec_ctx(&cc)?;

    match output.write_header() {
        Err(Error::HeaderWrite(message)) => assert!(message.contains("global header")),
        other => panic!("unexpected result: {:?}", other),
    }
    Ok(())
}

#[test]
fn test_write_packet_before_header() -> anyhow::Result<()> {
    ffmpeg_bridge::init()?;
    let mut output = OutputContext::with_format_name("", "mpegts")?;
    let mut packet = Packet::copy_from_slice(&[0; 16])?;
    assert!(matches!(
        output.write_packet(&mut packet),
        Err(Error::InvalidState(_))
    ));
    Ok(())
}

#[test]
fn test_set_io_after_header() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let input = InputContext::open(&fixture.input)?;
    let mut output = OutputContext::with_format_name("", "mpegts")?;
    output.set_io(IoBridge::from_writer(Sink::default())?)?;
    output.add_stream_from(&input.best_stream(media::Type::Video)?)?;
    output.write_header()?;

    let late = IoBridge::from_writer(Sink::default())?;
    assert!(matches!(output.set_io(late), Err(Error::IoBridge(_))));
    Ok(())
}

#[test]
fn test_reader_bridge_rejected_for_output() -> anyhow::Result<()> {
    ffmpeg_bridge::init()?;
    let mut output = OutputContext::with_format_name("", "mpegts")?;
    let io = IoBridge::from_reader(std::io::empty())?;
    assert!(matches!(output.set_io(io), Err(Error::IoBridge(_))));
    Ok(())
}

/// Stream copy from mp4 to mp4 keeps every packet, in order.
#[test]
fn test_remux_to_file() -> anyhow::Result<()> {
    let fixture = Fixture::new()?;
    let target = fixture.path("remuxed.mp4");

    let mut input = InputContext::open(&fixture.input)?;
    let mut output = OutputContext::new(target.as_path())?;
    output.add_stream_from(&input.best_stream(media::Type::Video)?)?;
    output.write_header()?;

    let mut written = Vec::new();
    while let Some(mut packet) = input.read_packet()? {
        written.push(packet.size());
        output.write_packet(&mut packet)?;
        release(&mut packet);
    }
    output.close_and_release();
    input.close_and_release();

    let mut reread = InputContext::open(&target)?;
    let sizes: Vec<usize> = reread.packets().map(|p| p.size()).collect();
    assert_eq!(sizes, written);
    Ok(())
}
