//! Assembles the textual response returned for one command invocation.
//!
//! Handlers declare what the response should carry (free-form lines, the page
//! list, a fresh snapshot, network or console data, images) and the assembler
//! renders everything in one fixed section order, refreshing the requested
//! state from the session context first.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::Result;
use crate::console::format_console_event;
use crate::context::SessionContext;
use crate::driver::ImageMimeType;
use crate::network::{self, HttpRequest, ResourceType};
use crate::pagination::{PageRequest, paginate};
use crate::snapshot::format_snapshot;

/// How the network request list section should be rendered.
#[derive(Debug, Clone, Default)]
pub struct NetworkRequestsOptions {
    pub pagination: Option<PageRequest>,
    /// When non-empty, only requests of these resource types are listed.
    pub resource_types: Vec<ResourceType>,
}

/// An image carried alongside the text, base64-encoded.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    pub mime_type: ImageMimeType,
    pub data: String,
}

/// One part of the final response.
#[derive(Debug, Clone)]
pub enum ResponsePart {
    Text(String),
    Image(ImageAttachment),
}

#[derive(Default)]
pub struct ToolResponse {
    include_pages: bool,
    include_snapshot: bool,
    include_console_data: bool,
    network_requests_options: Option<NetworkRequestsOptions>,
    attached_network_request_url: Option<String>,
    text_lines: Vec<String>,
    images: Vec<ImageAttachment>,
    formatted_console_data: Option<Vec<String>>,
}

impl ToolResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_response_line(&mut self, line: impl Into<String>) {
        self.text_lines.push(line.into());
    }

    pub fn set_include_pages(&mut self, value: bool) {
        self.include_pages = value;
    }

    pub fn set_include_snapshot(&mut self, value: bool) {
        self.include_snapshot = value;
    }

    pub fn set_include_console_data(&mut self, value: bool) {
        self.include_console_data = value;
    }

    pub fn set_include_network_requests(&mut self, value: bool, options: NetworkRequestsOptions) {
        self.network_requests_options = value.then_some(options);
    }

    /// Requests the detail section for one collected request, looked up by
    /// exact URL at render time.
    pub fn attach_network_request(&mut self, url: impl Into<String>) {
        self.attached_network_request_url = Some(url.into());
    }

    pub fn attach_image(&mut self, mime_type: ImageMimeType, data: &[u8]) {
        self.images.push(ImageAttachment {
            mime_type,
            data: BASE64.encode(data),
        });
    }

    pub fn include_pages(&self) -> bool {
        self.include_pages
    }

    pub fn include_snapshot(&self) -> bool {
        self.include_snapshot
    }

    pub fn include_console_data(&self) -> bool {
        self.include_console_data
    }

    pub fn attached_network_request_url(&self) -> Option<&str> {
        self.attached_network_request_url.as_deref()
    }

    /// Refreshes the requested state from the context and renders the
    /// response.
    pub async fn handle(
        mut self,
        tool_name: &str,
        context: &mut SessionContext,
    ) -> Result<Vec<ResponsePart>> {
        if self.include_pages {
            context.create_pages_snapshot().await?;
        }
        if self.include_snapshot {
            context.create_text_snapshot().await?;
        }
        if self.include_console_data {
            self.formatted_console_data = Some(
                context
                    .console_data()?
                    .snapshot()
                    .iter()
                    .map(format_console_event)
                    .collect(),
            );
        }
        self.format(tool_name, context)
    }

    fn format(&self, tool_name: &str, context: &SessionContext) -> Result<Vec<ResponsePart>> {
        let mut lines = vec![format!("# {tool_name} response")];
        lines.extend(self.text_lines.iter().cloned());

        if let Some(conditions) = context.get_network_conditions() {
            lines.push("## Network emulation".to_string());
            lines.push(format!("Emulating: {conditions}"));
            lines.push(format!(
                "Default navigation timeout set to {} ms",
                context.navigation_timeout()?
            ));
        }

        let cpu_rate = context.get_cpu_throttling_rate();
        if cpu_rate > 1.0 {
            lines.push("## CPU emulation".to_string());
            lines.push(format!("Emulating: {cpu_rate}x slowdown"));
        }

        if let Some(dialog) = context.dialog() {
            lines.push(format!(
                "# Open dialog\n{}: {} (default value: {}).\nCall handle_dialog to handle it before continuing.",
                dialog.kind, dialog.message, dialog.default_value
            ));
        }

        if self.include_pages {
            lines.push("## Pages".to_string());
            for (idx, page) in context.pages().iter().enumerate() {
                let selected = if Some(idx) == context.selected_page_idx() {
                    " [selected]"
                } else {
                    ""
                };
                lines.push(format!("{idx}: {}{selected}", page.url()));
            }
        }

        if self.include_snapshot
            && let Some(snapshot) = context.text_snapshot()
        {
            lines.push("## Page content".to_string());
            lines.push(format_snapshot(snapshot.root()).trim_end().to_string());
        }

        if let Some(url) = &self.attached_network_request_url {
            let request = context.network_request_by_url(url)?;
            lines.extend(request_detail_lines(&request));
        }

        if let Some(options) = &self.network_requests_options {
            let mut requests = context.network_requests()?.snapshot();
            if !options.resource_types.is_empty() {
                requests.retain(|request| {
                    options.resource_types.contains(&request.resource_type())
                });
            }
            lines.push("## Network requests".to_string());
            if requests.is_empty() {
                lines.push("No requests found.".to_string());
            } else {
                let (info, items) = data_with_pagination(&requests, options.pagination);
                lines.extend(info);
                for request in items {
                    lines.push(network::short_description(request));
                }
            }
        }

        if self.include_console_data
            && let Some(formatted) = &self.formatted_console_data
        {
            lines.push("## Console messages".to_string());
            if formatted.is_empty() {
                lines.push("<no console messages found>".to_string());
            } else {
                lines.extend(formatted.iter().cloned());
            }
        }

        let mut parts = vec![ResponsePart::Text(lines.join("\n"))];
        parts.extend(self.images.iter().cloned().map(ResponsePart::Image));
        Ok(parts)
    }
}

/// Detail section for a single request: status, headers and, when resolved,
/// the failure or the redirect chain that led here.
fn request_detail_lines(request: &HttpRequest) -> Vec<String> {
    let mut lines = vec![
        format!("## Request {}", request.url()),
        format!("Status:  {}", network::status_label(request)),
        "### Request Headers".to_string(),
    ];
    lines.extend(network::format_headers(request.request_headers()));

    if let Some(response) = request.response() {
        lines.push("### Response Headers".to_string());
        lines.extend(network::format_headers(response.headers()));
    }

    if let Some(failure) = request.failure() {
        lines.push("### Request failed with".to_string());
        lines.push(failure.to_string());
    }

    let redirect_chain = request.redirect_chain();
    if !redirect_chain.is_empty() {
        lines.push("### Redirect chain".to_string());
        // Stored most recent first; rendered oldest first with growing indent.
        for (indent, hop) in redirect_chain.iter().rev().enumerate() {
            lines.push(format!(
                "{}{}",
                "  ".repeat(indent),
                network::short_description(hop)
            ));
        }
    }
    lines
}

fn data_with_pagination<'a>(
    requests: &'a [Arc<HttpRequest>],
    pagination: Option<PageRequest>,
) -> (Vec<String>, &'a [Arc<HttpRequest>]) {
    let mut info = Vec::new();
    let window = paginate(requests, pagination);
    if window.invalid_page {
        info.push("Invalid page number provided. Showing first page.".to_string());
    }
    info.push(format!(
        "Showing {}-{} of {} (Page {} of {}).",
        window.start_index + 1,
        window.end_index,
        window.total,
        window.current_page + 1,
        window.total_pages
    ));
    if pagination.is_some() {
        if window.has_next_page() {
            info.push(format!("Next page: {}", window.current_page + 1));
        }
        if window.has_previous_page() {
            info.push(format!("Previous page: {}", window.current_page - 1));
        }
    }
    (info, window.items)
}
