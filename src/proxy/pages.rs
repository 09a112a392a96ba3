// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Static HTML rendering for the sign-in and error pages.
//!
//! Deliberately template-engine free; the pages are two small forms.
//! Operator-supplied banner/footer strings are trusted HTML, anything
//! derived from the request is escaped.

pub const ROBOTS_TXT: &str = "User-agent: *\nDisallow: /";

/// Renders the proxy's own pages with the configured branding.
#[derive(Debug, Clone)]
pub struct PageRenderer {
    pub proxy_prefix: String,
    pub provider_name: String,
    pub sign_in_message: String,
    pub footer: String,
    pub display_htpasswd_form: bool,
}

impl PageRenderer {
    /// The 403/500 page.  `message` is the provider's or our own text,
    /// never raw client input.
    pub fn error_page(&self, code: u16, title: &str, message: &str) -> String {
        format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head><title>{code} {title}</title></head>\n\
             <body>\n<h2>{code} {title}</h2>\n<p>{message}</p>\n\
             <hr><p><a href=\"{prefix}/sign_in\">Sign In</a></p>\n</body>\n</html>\n",
            code = code,
            title = html_escape(title),
            message = html_escape(message),
            prefix = self.proxy_prefix,
        )
    }

    /// The sign-in page: provider button, optional htpasswd form.
    pub fn sign_in_page(&self, redirect: &str) -> String {
        let redirect = html_escape(redirect);
        let mut body = String::new();

        if !self.sign_in_message.is_empty() {
            body.push_str(&format!("<p>{}</p>\n", self.sign_in_message));
        }

        body.push_str(&format!(
            "<form method=\"GET\" action=\"{prefix}/start\">\n\
             <input type=\"hidden\" name=\"rd\" value=\"{redirect}\">\n\
             <button type=\"submit\">Sign in with {provider}</button>\n</form>\n",
            prefix = self.proxy_prefix,
            redirect = redirect,
            provider = html_escape(&self.provider_name),
        ));

        if self.display_htpasswd_form {
            body.push_str(&format!(
                "<form method=\"POST\" action=\"{prefix}/sign_in\">\n\
                 <input type=\"hidden\" name=\"rd\" value=\"{redirect}\">\n\
                 <label>Username <input type=\"text\" name=\"username\"></label>\n\
                 <label>Password <input type=\"password\" name=\"password\"></label>\n\
                 <button type=\"submit\">Sign in</button>\n</form>\n",
                prefix = self.proxy_prefix,
                redirect = redirect,
            ));
        }

        if !self.footer.is_empty() {
            body.push_str(&format!("<footer>{}</footer>\n", self.footer));
        }

        format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head><title>Sign In</title></head>\n\
             <body>\n{body}</body>\n</html>\n"
        )
    }
}

fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
