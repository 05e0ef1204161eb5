//! Chat bubbles.
//!
//! [`bubble`] is a pure function of a message's presentation inputs and the
//! clock. [`Bubble::layout`] turns the result into terminal lines.

use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use realchat_shared::constants::{BUBBLE_MAX_WIDTH_PERCENT, CAPTION_SEPARATOR};
use realchat_shared::time::relative_time;

/// Everything a bubble is drawn from.
#[derive(Debug, Clone, Copy)]
pub struct BubbleProps<'a> {
    pub content: &'a str,
    pub author: &'a str,
    pub created_at: DateTime<Utc>,
    pub is_current_user: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    /// Own messages.
    Highlighted,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bubble {
    pub alignment: Alignment,
    pub tone: Tone,
    pub content: String,
    /// `"{author} • {relative time}"`
    pub caption: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineRole {
    Body,
    Caption,
}

/// One terminal line of a laid-out bubble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BubbleLine {
    /// Blank columns before `text`.
    pub indent: usize,
    pub text: String,
    pub role: LineRole,
}

pub fn bubble(props: &BubbleProps<'_>, now: DateTime<Utc>) -> Bubble {
    let (alignment, tone) = if props.is_current_user {
        (Alignment::Right, Tone::Highlighted)
    } else {
        (Alignment::Left, Tone::Neutral)
    };

    Bubble {
        alignment,
        tone,
        content: props.content.to_string(),
        caption: format!(
            "{}{}{}",
            props.author,
            CAPTION_SEPARATOR,
            relative_time(props.created_at, now)
        ),
    }
}

impl Bubble {
    /// Lay the bubble out in a view `width` columns wide.
    ///
    /// Body lines are padded to a common width so the background forms a
    /// block, and neither body nor caption exceeds the bubble's share of
    /// the width.
    pub fn layout(&self, width: usize) -> Vec<BubbleLine> {
        let max = (width * BUBBLE_MAX_WIDTH_PERCENT / 100).max(3);
        let inner = max - 2;

        let body: Vec<String> = wrap(&self.content, inner);
        let body_width = body.iter().map(|l| l.width()).max().unwrap_or(0);
        let box_width = body_width + 2;

        let mut lines = Vec::new();
        for line in body {
            let pad = body_width - line.width();
            lines.push(BubbleLine {
                indent: self.indent(width, box_width),
                text: format!(" {line}{} ", " ".repeat(pad)),
                role: LineRole::Body,
            });
        }
        for line in wrap(&self.caption, max) {
            lines.push(BubbleLine {
                indent: self.indent(width, line.width()),
                text: line,
                role: LineRole::Caption,
            });
        }
        lines
    }

    fn indent(&self, width: usize, used: usize) -> usize {
        match self.alignment {
            Alignment::Left => 0,
            Alignment::Right => width.saturating_sub(used),
        }
    }
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let lines: Vec<String> = textwrap::wrap(text, width)
        .into_iter()
        .map(|l| l.into_owned())
        .collect();
    if lines.is_empty() {
        vec![String::new()]
    } else {
        lines
    }
}
