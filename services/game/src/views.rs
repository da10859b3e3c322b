//! Player-facing pages
//!
//! Every page is a small HTML document with a German title, a template key
//! (`<meta name="template">`) and the fields it needs. Values are escaped
//! before they reach the markup.

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use std::fmt::Write;

use crate::gate::UploadContext;
use crate::models::UploadLog;
use crate::validation::{MAX_COMMENT_CHARS, MAX_PLAYER_CITY_CHARS, MAX_PLAYER_NAME_CHARS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputKind {
    Hidden,
    Text,
    Number,
    Checkbox,
    File,
}

#[derive(Debug, Clone)]
struct Input {
    kind: InputKind,
    name: &'static str,
    label: &'static str,
    value: String,
    max_length: Option<usize>,
    required: bool,
}

impl Input {
    fn hidden(name: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind: InputKind::Hidden,
            name,
            label: "",
            value: value.into(),
            max_length: None,
            required: false,
        }
    }

    fn visible(kind: InputKind, name: &'static str, label: &'static str) -> Self {
        Self {
            kind,
            name,
            label,
            value: String::new(),
            max_length: None,
            required: false,
        }
    }

    fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

#[derive(Debug, Clone)]
struct Form {
    action: String,
    multipart: bool,
    submit: &'static str,
    inputs: Vec<Input>,
}

/// A rendered page and the status it is served with.
#[derive(Debug, Clone)]
pub struct Page {
    status: StatusCode,
    template: &'static str,
    title: &'static str,
    message: Option<String>,
    error: Option<String>,
    details: Vec<(&'static str, String)>,
    csrf_token: Option<String>,
    form: Option<Form>,
    items: Vec<String>,
}

impl Page {
    fn new(status: StatusCode, template: &'static str, title: &'static str) -> Self {
        Self {
            status,
            template,
            title,
            message: None,
            error: None,
            details: Vec::new(),
            csrf_token: None,
            form: None,
            items: Vec::new(),
        }
    }

    fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn detail(mut self, label: &'static str, value: impl Into<String>) -> Self {
        self.details.push((label, value.into()));
        self
    }

    /// Show a validation error above the form.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn template(&self) -> &'static str {
        self.template
    }

    pub fn access_denied() -> Self {
        Self::new(StatusCode::FORBIDDEN, "access_denied", "Zugang verweigert")
            .message("Scanne den QR-Code auf deiner Tasche, um Fotos hochzuladen.")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "access_denied", "Zugang verweigert").message(message)
    }

    pub fn invalid_token() -> Self {
        Self::new(StatusCode::FORBIDDEN, "invalid_token", "Ungültiger Token")
            .message("Dieser Code gehört zu keiner Tasche.")
    }

    pub fn token_deactivated() -> Self {
        Self::new(StatusCode::FORBIDDEN, "token_deactivated", "Token deaktiviert")
            .message("Diese Tasche ist im Moment nicht freigeschaltet.")
    }

    pub fn limit_reached(total_uploads: i32, max_uploads: i32) -> Self {
        Self::new(StatusCode::FORBIDDEN, "limit_reached", "Upload-Limit erreicht")
            .message("Mit dieser Tasche können keine weiteren Fotos hochgeladen werden.")
            .detail("Uploads", format!("{} / {}", total_uploads, max_uploads))
    }

    pub fn session_conflict(bag_name: &str, current_player: &str) -> Self {
        let mut page = Self::new(
            StatusCode::CONFLICT,
            "session_conflict",
            "Werkzeug wird bereits verwendet",
        )
        .message("Diese Tasche wird gerade auf einem anderen Gerät verwendet. Bitte die Person, dich einzuladen.");
        if !bag_name.is_empty() {
            page = page.detail("Tasche", bag_name);
        }
        if !current_player.is_empty() {
            page = page.detail("Spieler", current_player);
        }
        page
    }

    pub fn enter_name(token: &str, bag_name: &str, csrf_token: &str) -> Self {
        let mut page = Self::new(StatusCode::OK, "enter_name", "Willkommen")
            .message("Wie heißt du? Dein Name erscheint bei deinen Fotos.");
        if !bag_name.is_empty() {
            page = page.detail("Tasche", bag_name);
        }
        page.csrf_token = Some(csrf_token.to_string());
        page.form = Some(Form {
            action: "/upload/set-name".to_string(),
            multipart: false,
            submit: "Los geht's",
            inputs: vec![
                Input::hidden("token", token),
                Input::hidden("csrf_token", csrf_token),
                Input::visible(InputKind::Text, "player_name", "Name")
                    .max_length(MAX_PLAYER_NAME_CHARS)
                    .required(),
                Input::visible(InputKind::Text, "player_city", "Stadt")
                    .max_length(MAX_PLAYER_CITY_CHARS),
                Input::visible(
                    InputKind::Checkbox,
                    "agree_privacy",
                    "Ich habe die Datenschutzerklärung gelesen",
                )
                .required(),
            ],
        });
        page
    }

    pub fn enter_name_invitation(invitation_code: &str, bag_name: &str) -> Self {
        let mut page = Self::new(StatusCode::OK, "enter_name_invitation", "Willkommen")
            .message("Du wurdest eingeladen, mit dieser Tasche Fotos hochzuladen. Wie heißt du?");
        if !bag_name.is_empty() {
            page = page.detail("Tasche", bag_name);
        }
        page.form = Some(Form {
            action: "/upload/invite/set-name".to_string(),
            multipart: false,
            submit: "Einladung annehmen",
            inputs: vec![
                Input::hidden("invitation_code", invitation_code),
                Input::visible(InputKind::Text, "player_name", "Name")
                    .max_length(MAX_PLAYER_NAME_CHARS)
                    .required(),
                Input::visible(InputKind::Text, "player_city", "Stadt")
                    .max_length(MAX_PLAYER_CITY_CHARS),
                Input::visible(
                    InputKind::Checkbox,
                    "agree_privacy",
                    "Ich habe die Datenschutzerklärung gelesen",
                )
                .required(),
            ],
        });
        page
    }

    pub fn invalid_invitation(status: StatusCode, message: &str) -> Self {
        Self::new(status, "invalid_invitation", "Einladung ungültig").message(message)
    }

    pub fn upload(context: &UploadContext, uploads: &[UploadLog], just_uploaded: bool) -> Self {
        let mut page = Self::new(StatusCode::OK, "upload", "Fotos hochladen")
            .detail("Tasche", context.bag_name.as_str())
            .detail("Spieler", context.current_player.as_str())
            .detail("Verbleibende Uploads", context.uploads_remaining.to_string());
        if !context.current_player_city.is_empty() {
            page = page.detail("Stadt", context.current_player_city.as_str());
        }
        if just_uploaded {
            page = page.message("Danke! Dein Foto wurde hochgeladen.");
        }

        page.csrf_token = Some(context.csrf_token.clone());
        page.form = Some(Form {
            action: format!(
                "/upload?token={}&csrf_token={}",
                encode_query(&context.token),
                encode_query(&context.csrf_token)
            ),
            multipart: true,
            submit: "Hochladen",
            inputs: vec![
                Input::hidden("token", context.token.as_str()),
                Input::hidden("csrf_token", context.csrf_token.as_str()),
                Input::visible(InputKind::Number, "derive_number", "Aufgabe").required(),
                Input::visible(InputKind::File, "image", "Foto").required(),
                Input::visible(InputKind::Text, "comment", "Kommentar")
                    .max_length(MAX_COMMENT_CHARS),
            ],
        });
        page.items = uploads
            .iter()
            .map(|upload| {
                let mut item = format!(
                    "Aufgabe {} von {} ({})",
                    upload.derive_number,
                    upload.player_name,
                    upload.uploaded_at.format("%d.%m.%Y %H:%M")
                );
                if let Some(comment) = &upload.comment {
                    let _ = write!(item, ": {}", comment);
                }
                item
            })
            .collect();
        page
    }

    pub fn bag_released() -> Self {
        Self::new(StatusCode::OK, "bag_released", "Werkzeug zurückgegeben")
            .message("Danke fürs Mitspielen! Die Tasche kann jetzt weitergegeben werden.")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", "Ungültige Anfrage").message(message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", "Nicht gefunden").message(message)
    }

    pub fn server_error() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "server_error",
            "Serverfehler",
        )
        .message("Etwas ist schiefgelaufen. Bitte versuche es gleich noch einmal.")
    }

    /// Render the page as an HTML document.
    pub fn render(&self) -> String {
        let mut html = String::with_capacity(1024);
        html.push_str("<!DOCTYPE html>\n<html lang=\"de\">\n<head>\n<meta charset=\"utf-8\">\n");
        html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
        let _ = writeln!(html, "<meta name=\"template\" content=\"{}\">", self.template);
        if let Some(csrf_token) = &self.csrf_token {
            let _ = writeln!(
                html,
                "<meta name=\"csrf-token\" content=\"{}\">",
                escape(csrf_token)
            );
        }
        let _ = writeln!(html, "<title>{} · ID-100</title>\n</head>", escape(self.title));
        html.push_str("<body>\n<main>\n");
        let _ = writeln!(html, "<h1>{}</h1>", escape(self.title));

        if let Some(message) = &self.message {
            let _ = writeln!(html, "<p class=\"message\">{}</p>", escape(message));
        }
        if let Some(error) = &self.error {
            let _ = writeln!(html, "<p class=\"error\" role=\"alert\">{}</p>", escape(error));
        }

        if !self.details.is_empty() {
            html.push_str("<dl>\n");
            for (label, value) in &self.details {
                let _ = writeln!(html, "<dt>{}</dt><dd>{}</dd>", escape(label), escape(value));
            }
            html.push_str("</dl>\n");
        }

        if let Some(form) = &self.form {
            render_form(&mut html, form);
        }

        if !self.items.is_empty() {
            html.push_str("<ul class=\"uploads\">\n");
            for item in &self.items {
                let _ = writeln!(html, "<li>{}</li>", escape(item));
            }
            html.push_str("</ul>\n");
        }

        html.push_str("</main>\n</body>\n</html>\n");
        html
    }
}

fn render_form(html: &mut String, form: &Form) {
    let enctype = if form.multipart {
        " enctype=\"multipart/form-data\""
    } else {
        ""
    };
    let _ = writeln!(
        html,
        "<form method=\"post\" action=\"{}\"{}>",
        escape(&form.action),
        enctype
    );

    for input in &form.inputs {
        let kind = match input.kind {
            InputKind::Hidden => "hidden",
            InputKind::Text => "text",
            InputKind::Number => "number",
            InputKind::Checkbox => "checkbox",
            InputKind::File => "file",
        };

        let mut attributes = format!("type=\"{}\" name=\"{}\"", kind, input.name);
        match input.kind {
            InputKind::Checkbox => attributes.push_str(" value=\"1\""),
            InputKind::File => attributes.push_str(" accept=\"image/*\""),
            _ => {
                let _ = write!(attributes, " value=\"{}\"", escape(&input.value));
            }
        }
        if let Some(max_length) = input.max_length {
            let _ = write!(attributes, " maxlength=\"{}\"", max_length);
        }
        if input.kind == InputKind::Number {
            attributes.push_str(" min=\"1\"");
        }
        if input.required {
            attributes.push_str(" required");
        }

        if input.kind == InputKind::Hidden {
            let _ = writeln!(html, "<input {}>", attributes);
        } else {
            let _ = writeln!(
                html,
                "<label>{} <input {}></label>",
                escape(input.label),
                attributes
            );
        }
    }

    let _ = writeln!(html, "<button type=\"submit\">{}</button>\n</form>", escape(form.submit));
}

/// Percent-encode a query parameter value.
pub fn encode_query(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Escape text for HTML element content and attribute values.
pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

impl IntoResponse for Page {
    fn into_response(self) -> Response {
        (self.status, Html(self.render())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(
            escape("<script>alert(\"x\") & 'y'</script>"),
            "&lt;script&gt;alert(&quot;x&quot;) &amp; &#39;y&#39;&lt;/script&gt;"
        );
    }

    #[test]
    fn test_enter_name_carries_csrf_and_token() {
        let html = Page::enter_name("tok-123", "Rote Tasche", "csrf-abc").render();

        assert!(html.contains("<meta name=\"template\" content=\"enter_name\">"));
        assert!(html.contains("<meta name=\"csrf-token\" content=\"csrf-abc\">"));
        assert!(html.contains("name=\"token\" value=\"tok-123\""));
        assert!(html.contains("name=\"csrf_token\" value=\"csrf-abc\""));
        assert!(html.contains("action=\"/upload/set-name\""));
    }

    #[test]
    fn test_conflict_page_escapes_player_name() {
        let page = Page::session_conflict("Tasche", "<b>Eve</b>");
        assert_eq!(page.status(), StatusCode::CONFLICT);

        let html = page.render();
        assert!(html.contains("&lt;b&gt;Eve&lt;/b&gt;"));
        assert!(!html.contains("<b>Eve</b>"));
    }

    #[test]
    fn test_error_pages_use_their_status() {
        assert_eq!(Page::access_denied().status(), StatusCode::FORBIDDEN);
        assert_eq!(Page::limit_reached(3, 3).template(), "limit_reached");
        assert_eq!(
            Page::server_error().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
