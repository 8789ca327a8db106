use serenity::{
    all::ButtonStyle,
    builder::{CreateActionRow, CreateButton},
};

/// IDs personalizados para los botones
pub mod button_ids {
    /// Queue navigation buttons carry the target page: `queue:<page>`.
    pub const QUEUE_PAGE_PREFIX: &str = "queue:";
}

/// Crea los botones de navegación de la cola (páginas desde 0)
pub fn create_queue_buttons(current_page: usize, total_pages: usize) -> CreateActionRow {
    let prev_btn = CreateButton::new(queue_page_id(current_page.saturating_sub(1)))
        .emoji('◀')
        .style(ButtonStyle::Primary)
        .disabled(current_page == 0);

    let next_btn = CreateButton::new(queue_page_id(current_page + 1))
        .emoji('▶')
        .style(ButtonStyle::Primary)
        .disabled(current_page + 1 >= total_pages);

    CreateActionRow::Buttons(vec![prev_btn, next_btn])
}

fn queue_page_id(page: usize) -> String {
    format!("{}{}", button_ids::QUEUE_PAGE_PREFIX, page)
}

/// Extrae la página de un botón de la cola
pub fn parse_queue_page(custom_id: &str) -> Option<usize> {
    custom_id
        .strip_prefix(button_ids::QUEUE_PAGE_PREFIX)?
        .parse()
        .ok()
}
