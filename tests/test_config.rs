#![cfg(feature = "cli")]

use clap::Parser;

use usbd_raw_gadget::{GadgetArgs, GadgetConfig, UsbSpeed};

#[derive(Parser, Debug)]
#[command(name = "usb-test")]
struct Cli {
    #[command(flatten)]
    gadget: GadgetArgs,
}

fn parse(args: &[&str]) -> Result<GadgetConfig, clap::Error> {
    let argv = std::iter::once("usb-test").chain(args.iter().copied());
    Cli::try_parse_from(argv).map(|cli| cli.gadget.into())
}

#[test]
fn test_defaults_match_config_default() {
    assert_eq!(parse(&[]).expect("parse"), GadgetConfig::default());
}

#[test]
fn test_udc_and_options() {
    let cfg = parse(&[
        "fe980000.usb",
        "fe980000.usb",
        "--speed",
        "full",
        "--write-retries",
        "0",
        "--max-transfer",
        "512",
    ])
    .expect("parse");

    assert_eq!(
        cfg,
        GadgetConfig::default()
            .with_udc("fe980000.usb", "fe980000.usb")
            .with_speed(UsbSpeed::Full)
            .with_write_retries(0)
            .with_max_transfer(512)
    );
}

#[test]
fn test_usage_errors() {
    use clap::error::ErrorKind;

    let err = parse(&["a", "b", "c"]).expect_err("extra argument");
    assert_eq!(err.kind(), ErrorKind::UnknownArgument);

    let err = parse(&["--speed", "warp"]).expect_err("bad speed");
    assert_eq!(err.kind(), ErrorKind::InvalidValue);

    let err = parse(&["--help"]).expect_err("help");
    assert_eq!(err.kind(), ErrorKind::DisplayHelp);
}
