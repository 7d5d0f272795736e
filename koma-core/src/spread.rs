//! Which volume pages make up the displayed page set.

use std::ops::Range;
use std::str::FromStr;

use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};

use crate::model::Page;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Spread {
    #[default]
    Single,
    /// Consecutive portrait pages are shown side by side.
    Double,
}

impl FromStr for Spread {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "single" => Ok(Spread::Single),
            "double" => Ok(Spread::Double),
            other => bail!("unknown spread mode {:?}", other),
        }
    }
}

impl Spread {
    pub fn name(&self) -> &'static str {
        match self {
            Spread::Single => "single",
            Spread::Double => "double",
        }
    }

    /// Indexes of `pages` shown when `current` is the first displayed page.
    pub fn pages_to_render(&self, pages: &[Page], current: usize) -> Range<usize> {
        let Some(page) = pages.get(current) else {
            return 0..0;
        };
        match self {
            Spread::Single => current..current + 1,
            Spread::Double => {
                if !page.is_portrait() {
                    return current..current + 1;
                }
                match pages.get(current + 1) {
                    Some(next) if next.is_portrait() => current..current + 2,
                    _ => current..current + 1,
                }
            }
        }
    }

    pub fn next_page(&self, pages: &[Page], current: usize) -> usize {
        let shown = self.pages_to_render(pages, current).len().max(1);
        let next = current + shown;
        if next < pages.len() {
            next
        } else {
            current
        }
    }

    pub fn previous_page(&self, pages: &[Page], current: usize) -> usize {
        if current == 0 || current > pages.len() {
            return current.min(pages.len().saturating_sub(1));
        }
        match self {
            Spread::Single => current - 1,
            Spread::Double => {
                if current >= 2 && pages[current - 2].is_portrait() && pages[current - 1].is_portrait()
                {
                    current - 2
                } else {
                    current - 1
                }
            }
        }
    }

    /// First page to display so that `target` is visible.
    pub fn page_for_appearance(&self, pages: &[Page], target: usize, current: usize) -> usize {
        let Some(page) = pages.get(target) else {
            return current;
        };
        match self {
            Spread::Single => target,
            Spread::Double => {
                if page.is_portrait() && target > 0 && pages[target - 1].is_portrait() {
                    target - 1
                } else {
                    target
                }
            }
        }
    }

    /// Mode used while browsing a word's appearances.
    pub fn context_mode(&self) -> Spread {
        Spread::Single
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(index: usize, width: f32, height: f32) -> Page {
        Page {
            index,
            width,
            height,
            image_ref: format!("{index:03}.jpg"),
            blocks: Vec::new(),
        }
    }

    fn volume() -> Vec<Page> {
        vec![
            page(0, 800.0, 1200.0),
            page(1, 800.0, 1200.0),
            page(2, 1600.0, 1200.0),
            page(3, 800.0, 1200.0),
            page(4, 800.0, 1200.0),
        ]
    }

    #[test]
    fn single_mode_steps_one_page() {
        let pages = volume();
        assert_eq!(Spread::Single.pages_to_render(&pages, 1), 1..2);
        assert_eq!(Spread::Single.next_page(&pages, 1), 2);
        assert_eq!(Spread::Single.next_page(&pages, 4), 4);
        assert_eq!(Spread::Single.previous_page(&pages, 0), 0);
        assert_eq!(Spread::Single.previous_page(&pages, 3), 2);
    }

    #[test]
    fn double_mode_pairs_portrait_pages() {
        let pages = volume();
        assert_eq!(Spread::Double.pages_to_render(&pages, 0), 0..2);
        assert_eq!(Spread::Double.pages_to_render(&pages, 2), 2..3);
        assert_eq!(Spread::Double.pages_to_render(&pages, 4), 4..5);
        assert_eq!(Spread::Double.next_page(&pages, 0), 2);
        assert_eq!(Spread::Double.next_page(&pages, 2), 3);
        assert_eq!(Spread::Double.previous_page(&pages, 2), 0);
        assert_eq!(Spread::Double.previous_page(&pages, 3), 2);
    }

    #[test]
    fn appearance_page_opens_enclosing_spread() {
        let pages = volume();
        assert_eq!(Spread::Double.page_for_appearance(&pages, 1, 4), 0);
        assert_eq!(Spread::Double.page_for_appearance(&pages, 2, 4), 2);
        assert_eq!(Spread::Double.page_for_appearance(&pages, 3, 0), 3);
        assert_eq!(Spread::Double.page_for_appearance(&pages, 9, 4), 4);
        assert_eq!(Spread::Single.page_for_appearance(&pages, 1, 4), 1);
    }

    #[test]
    fn parses_mode_names() {
        assert_eq!("double".parse::<Spread>().unwrap(), Spread::Double);
        assert!("triple".parse::<Spread>().is_err());
        assert_eq!(Spread::Double.context_mode(), Spread::Single);
    }
}
