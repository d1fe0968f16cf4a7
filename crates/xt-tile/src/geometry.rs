//! Map-space bounds and screen-space placement.

/// Rectangle in map units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl Bounds {
    pub fn new(left: f64, bottom: f64, right: f64, top: f64) -> Self {
        Self {
            left,
            bottom,
            right,
            top,
        }
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    /// `left,bottom,right,top` rounded to six decimals, as WMS expects.
    pub fn to_bbox(&self) -> String {
        [self.left, self.bottom, self.right, self.top]
            .iter()
            .map(|value| format_coordinate(*value))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parses `left,bottom,right,top`.
    pub fn from_bbox(value: &str) -> Option<Self> {
        let parts: Vec<f64> = value
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .ok()?;
        match parts.as_slice() {
            [left, bottom, right, top] => Some(Self::new(*left, *bottom, *right, *top)),
            _ => None,
        }
    }
}

fn format_coordinate(value: f64) -> String {
    let rounded = (value * 1e6).round() / 1e6;
    // Avoid "-0" for values that round to zero.
    if rounded == 0.0 {
        "0".to_owned()
    } else {
        rounded.to_string()
    }
}

/// Position in layer pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pixel {
    pub x: i32,
    pub y: i32,
}

impl Pixel {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parses `WIDTHxHEIGHT`.
    pub fn from_dimensions(value: &str) -> Option<Self> {
        let (width, height) = value.split_once(['x', 'X'])?;
        Some(Self::new(width.trim().parse().ok()?, height.trim().parse().ok()?))
    }
}

#[cfg(test)]
mod tests {
    use super::Bounds;
    use super::Size;

    #[test]
    fn bbox_uses_six_decimals() {
        let bounds = Bounds::new(-180.0, -90.0, 0.1234567, 45.5);
        assert_eq!(bounds.to_bbox(), "-180,-90,0.123457,45.5");
        assert!((bounds.height() - 135.5).abs() < 1e-9);
    }

    #[test]
    fn parses_cli_geometry() {
        assert_eq!(
            Bounds::from_bbox("0, 0, 10, 20"),
            Some(Bounds::new(0.0, 0.0, 10.0, 20.0))
        );
        assert_eq!(Bounds::from_bbox("0,0,10"), None);
        assert_eq!(Size::from_dimensions("256x128"), Some(Size::new(256, 128)));
        assert_eq!(Size::from_dimensions("256"), None);
    }
}
