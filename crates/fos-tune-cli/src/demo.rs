//! Synthetic chat page for the demo run.

use fos_page::{DomError, HeadlessPage, NodeId};

/// A long conversation with the debris real chat pages pile up.
pub struct ChatPage {
    pub page: HeadlessPage,
    pub messages: Vec<NodeId>,
    pub composer: NodeId,
}

impl ChatPage {
    /// Build `messages` turns in a 1280x800 viewport.
    ///
    /// Every third turn carries a code block, every fifth a blob image in
    /// a collapsed attachment panel, every seventh a closed tooltip.
    pub fn build(messages: usize) -> Result<Self, DomError> {
        let page = HeadlessPage::with_viewport(1280.0, 800.0);
        let root = page.root();

        let thread = page.element("main").append_to(root)?;
        let mut turns = Vec::with_capacity(messages);
        for i in 0..messages {
            let turn = page
                .element("article")
                .attr("data-testid", &format!("conversation-turn-{i}"))
                .height(24.0)
                .append_to(thread)?;

            let body_height = 60.0 + ((i * 37) % 140) as f32;
            page.element("p")
                .text(&format!("Message {i}"))
                .height(body_height)
                .append_to(turn)?;

            if i % 3 == 2 {
                page.element("pre").height(240.0).append_to(turn)?;
            }
            if i % 5 == 4 {
                let panel = page.element("div").attr("hidden", "").append_to(turn)?;
                page.element("img")
                    .attr("src", &format!("blob:https://chat.example/{i}"))
                    .append_to(panel)?;
            }
            if i % 7 == 6 {
                page.element("div")
                    .attr("role", "tooltip")
                    .attr("hidden", "")
                    .append_to(root)?;
            }
            turns.push(turn);
        }

        // Leftovers from closed menus and hot-reloaded components
        for _ in 0..3 {
            page.element("style").append_to(root)?;
        }
        for _ in 0..2 {
            page.element("div").attr("data-radix-portal", "").append_to(root)?;
        }
        page.element("img").attr("src", "https://chat.example/avatar.png").append_to(root)?;

        let composer = page.element("textarea").height(48.0).append_to(root)?;

        Ok(Self {
            page,
            messages: turns,
            composer,
        })
    }

    /// Scroll offset that shows the end of the conversation.
    pub fn bottom(&self) -> f32 {
        (self.page.content_height() - 800.0).max(0.0)
    }
}
