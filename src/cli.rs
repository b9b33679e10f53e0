use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Zenoh endpoint to connect to (multicast scouting when unset)
    #[arg(long, env = "ZENOH_CONNECT")]
    pub connect: Option<String>,

    /// Channel carrying camera frame envelopes
    #[arg(long, env = "CAMERA_CHANNEL", default_value = "rc/camera/frame")]
    pub camera_channel: String,

    /// Channel to publish road detection results on
    #[arg(long, env = "ROAD_CHANNEL", default_value = "rc/road/contour")]
    pub road_channel: String,

    /// Horizon row in pixels from the top; rows above it are ignored
    #[arg(long, env = "HORIZON", default_value_t = 20)]
    pub horizon: i32,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
