//! Screen rectangles

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in panel pixels.
///
/// `(x1, y1)` is inclusive, `(x2, y2)` exclusive. Degenerate rectangles
/// (x2 <= x1 or y2 <= y1) are kept as given and contain no point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(i32, i32, i32, i32)", into = "(i32, i32, i32, i32)")]
pub struct Rect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Rect {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Rectangle of the given size anchored at the origin
    pub const fn screen(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x1 && x < self.x2 && y >= self.y1 && y < self.y2
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let r = Rect::new(
            self.x1.max(other.x1),
            self.y1.max(other.y1),
            self.x2.min(other.x2),
            self.y2.min(other.y2),
        );
        (!r.is_empty()).then_some(r)
    }

    /// Parts of `self` outside `other`, as up to four disjoint rectangles
    pub fn subtract(&self, other: &Rect) -> Vec<Rect> {
        let Some(cut) = self.intersection(other) else {
            return if self.is_empty() { Vec::new() } else { vec![*self] };
        };

        [
            Rect::new(self.x1, self.y1, self.x2, cut.y1),
            Rect::new(self.x1, cut.y2, self.x2, self.y2),
            Rect::new(self.x1, cut.y1, cut.x1, cut.y2),
            Rect::new(cut.x2, cut.y1, self.x2, cut.y2),
        ]
        .into_iter()
        .filter(|r| !r.is_empty())
        .collect()
    }

    /// Smallest rectangle containing all of `rects`
    pub fn bounds<'a>(rects: impl IntoIterator<Item = &'a Rect>) -> Option<Rect> {
        rects
            .into_iter()
            .filter(|r| !r.is_empty())
            .copied()
            .reduce(|a, b| {
                Rect::new(a.x1.min(b.x1), a.y1.min(b.y1), a.x2.max(b.x2), a.y2.max(b.y2))
            })
    }
}

impl From<(i32, i32, i32, i32)> for Rect {
    fn from((x1, y1, x2, y2): (i32, i32, i32, i32)) -> Self {
        Self::new(x1, y1, x2, y2)
    }
}

impl From<Rect> for (i32, i32, i32, i32) {
    fn from(r: Rect) -> Self {
        (r.x1, r.y1, r.x2, r.y2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_edges() {
        let r = Rect::new(10, 20, 30, 40);
        assert!(r.contains(10, 20));
        assert!(r.contains(29, 39));
        assert!(!r.contains(30, 39));
        assert!(!r.contains(29, 40));
        assert!(!r.contains(9, 25));
    }

    #[test]
    fn test_degenerate_contains_nothing() {
        let inverted = Rect::new(30, 40, 10, 20);
        assert!(inverted.is_empty());
        assert!(!inverted.contains(20, 30));
        assert!(!Rect::new(5, 5, 5, 10).contains(5, 5));
    }

    #[test]
    fn test_intersection() {
        let screen = Rect::screen(100, 100);
        assert_eq!(
            screen.intersection(&Rect::new(-10, 50, 20, 150)),
            Some(Rect::new(0, 50, 20, 100))
        );
        assert_eq!(screen.intersection(&Rect::new(100, 0, 200, 50)), None);
    }

    #[test]
    fn test_subtract() {
        let r = Rect::new(0, 0, 100, 100);
        assert!(r.subtract(&Rect::new(-5, -5, 105, 105)).is_empty());
        assert_eq!(r.subtract(&Rect::new(200, 0, 300, 50)), vec![r]);
        assert_eq!(
            r.subtract(&Rect::new(0, 0, 100, 40)),
            vec![Rect::new(0, 40, 100, 100)]
        );

        let ring = r.subtract(&Rect::new(10, 10, 20, 20));
        assert_eq!(ring.len(), 4);
        let area: i32 = ring.iter().map(|p| (p.x2 - p.x1) * (p.y2 - p.y1)).sum();
        assert_eq!(area, 100 * 100 - 10 * 10);
        assert!(!ring.iter().any(|p| p.contains(15, 15)));
    }

    #[test]
    fn test_bounds() {
        assert_eq!(Rect::bounds(std::iter::empty()), None);
        assert_eq!(
            Rect::bounds(&[Rect::new(0, 40, 50, 50), Rect::new(40, 0, 50, 40)]),
            Some(Rect::new(0, 0, 50, 50))
        );
        assert_eq!(
            Rect::bounds(&[Rect::new(5, 5, 5, 5), Rect::new(1, 1, 2, 2)]),
            Some(Rect::new(1, 1, 2, 2))
        );
    }

    #[test]
    fn test_serde_tuple() {
        let r = Rect::new(1, 2, 3, 4);
        assert_eq!(serde_json::to_string(&r).unwrap(), "[1,2,3,4]");
        assert_eq!(serde_json::from_str::<Rect>("[1,2,3,4]").unwrap(), r);
    }
}
