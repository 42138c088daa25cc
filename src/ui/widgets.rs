//! Small layout helpers shared by the modal overlays.

use ratatui::layout::Rect;

/// Fixed-size rect centered in `area`, clamped to fit.
pub fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

/// Truncate `text` to at most `max` characters.
pub fn fit(text: &str, max: u16) -> String {
    text.chars().take(max as usize).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centered_rect_is_centered() {
        let area = Rect::new(0, 0, 100, 40);
        let rect = centered_rect(60, 10, area);
        assert_eq!(rect, Rect::new(20, 15, 60, 10));
    }

    #[test]
    fn centered_rect_clamps_to_area() {
        let area = Rect::new(0, 0, 20, 5);
        let rect = centered_rect(60, 10, area);
        assert_eq!(rect.width, 20);
        assert_eq!(rect.height, 5);
    }

    #[test]
    fn fit_truncates() {
        assert_eq!(fit("hello world", 5), "hello");
        assert_eq!(fit("hi", 5), "hi");
    }
}
