//! Page-window selection over collected item lists.

/// A caller-requested window. `page_size` of `None` disables pagination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub page_size: Option<usize>,
    pub page_idx: Option<usize>,
}

/// The resolved window over a list of items.
#[derive(Debug)]
pub struct Paginated<'a, T> {
    pub items: &'a [T],
    /// Index of the first item of the window within the full list.
    pub start_index: usize,
    /// Index one past the last item of the window.
    pub end_index: usize,
    pub total: usize,
    pub current_page: usize,
    pub total_pages: usize,
    /// Whether pagination was requested at all.
    pub paginated: bool,
    /// Set when the requested page index was out of range and the first page
    /// was substituted.
    pub invalid_page: bool,
}

impl<T> Paginated<'_, T> {
    pub fn has_next_page(&self) -> bool {
        self.paginated && self.current_page + 1 < self.total_pages
    }

    pub fn has_previous_page(&self) -> bool {
        self.paginated && self.current_page > 0
    }
}

/// Resolves a window over `items`. Out-of-range page indices fall back to the
/// first page with `invalid_page` set, never an error.
pub fn paginate<'a, T>(items: &'a [T], request: Option<PageRequest>) -> Paginated<'a, T> {
    let total = items.len();
    let request = request.unwrap_or_default();

    let Some(page_size) = request.page_size else {
        // A bare page index without a page size cannot be honored.
        let invalid_page = request.page_idx.is_some_and(|idx| idx > 0);
        return Paginated {
            items,
            start_index: 0,
            end_index: total,
            total,
            current_page: 0,
            total_pages: 1,
            paginated: false,
            invalid_page,
        };
    };

    let page_size = page_size.max(1);
    let total_pages = total.div_ceil(page_size).max(1);
    let requested = request.page_idx.unwrap_or(0);
    let (current_page, invalid_page) = if requested >= total_pages {
        (0, true)
    } else {
        (requested, false)
    };

    let start_index = current_page * page_size;
    let end_index = (start_index + page_size).min(total);
    Paginated {
        items: &items[start_index..end_index],
        start_index,
        end_index,
        total,
        current_page,
        total_pages,
        paginated: true,
        invalid_page,
    }
}
