use eyre::WrapErr;
use eyre::bail;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub struct ViewerCommandLine {
    pub use_warp_device: bool,
    pub width: u32,
    pub height: u32,
    /// Exit after this many frames.
    pub frame_limit: Option<u64>,
    pub vertex_shader: PathBuf,
    pub pixel_shader: PathBuf,
    /// Image wrapped around the demo sphere as its base color.
    pub model: Option<PathBuf>,
}

impl Default for ViewerCommandLine {
    fn default() -> Self {
        Self {
            use_warp_device: false,
            width: 1280,
            height: 720,
            frame_limit: None,
            vertex_shader: PathBuf::from("shaders/pbr_vs.cso"),
            pixel_shader: PathBuf::from("shaders/pbr_ps.cso"),
            model: None,
        }
    }
}

fn is_flag(arg: &str, name: &str) -> bool {
    arg.strip_prefix('-')
        .or_else(|| arg.strip_prefix('/'))
        .is_some_and(|rest| rest.eq_ignore_ascii_case(name))
}

impl ViewerCommandLine {
    /// Accepts `-flag` and `/flag`, case-insensitively. Unknown arguments are ignored.
    pub fn parse(args: impl IntoIterator<Item = String>) -> eyre::Result<Self> {
        let mut command_line = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            if is_flag(&arg, "warp") {
                command_line.use_warp_device = true;
                continue;
            }
            let Some(name) = ["width", "height", "frames", "vs", "ps", "model"]
                .into_iter()
                .find(|name| is_flag(&arg, name))
            else {
                continue;
            };
            let Some(value) = args.next() else {
                bail!("{} needs a value", arg);
            };
            match name {
                "width" => command_line.width = value.parse().wrap_err("-width")?,
                "height" => command_line.height = value.parse().wrap_err("-height")?,
                "frames" => command_line.frame_limit = Some(value.parse().wrap_err("-frames")?),
                "vs" => command_line.vertex_shader = value.into(),
                "ps" => command_line.pixel_shader = value.into(),
                _ => command_line.model = Some(value.into()),
            }
        }
        if command_line.width == 0 || command_line.height == 0 {
            bail!("window size must be non-zero");
        }
        Ok(command_line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> eyre::Result<ViewerCommandLine> {
        ViewerCommandLine::parse(args.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn flags_are_case_insensitive() -> eyre::Result<()> {
        let command_line = parse(&["/WARP", "-Width", "800", "-height", "600", "-frames", "3"])?;
        assert!(command_line.use_warp_device);
        assert_eq!((command_line.width, command_line.height), (800, 600));
        assert_eq!(command_line.frame_limit, Some(3));
        Ok(())
    }

    #[test]
    fn shader_and_model_paths() -> eyre::Result<()> {
        let command_line = parse(&["-vs", "a.cso", "-ps", "b.cso", "-model", "brick.png", "extra"])?;
        assert_eq!(command_line.vertex_shader, PathBuf::from("a.cso"));
        assert_eq!(command_line.pixel_shader, PathBuf::from("b.cso"));
        assert_eq!(command_line.model, Some(PathBuf::from("brick.png")));
        Ok(())
    }

    #[test]
    fn bad_values_are_reported() {
        assert!(parse(&["-width"]).is_err());
        assert!(parse(&["-width", "wide"]).is_err());
        assert!(parse(&["-height", "0"]).is_err());
        assert_eq!(parse(&[]).ok(), Some(ViewerCommandLine::default()));
    }
}
