//! Reference extension command: a blocking HTTP client.
//!
//! This is the one extension that ships with the sandbox itself; it doubles
//! as the template for wiring external tools through the extension
//! contract. The request blocks the calling thread and honors the sandbox's
//! command timeout as its deadline. Response bodies can be captured into
//! the sandbox filesystem with `-o`, which routes through the quota-guarded
//! context like every other write.

use crate::shell::{CommandOutput, ExtensionCommand, ShellContext};

pub struct HttpCommand;

#[derive(Debug)]
struct HttpRequest {
    method: String,
    url: String,
    body: Option<String>,
    output: Option<String>,
}

impl HttpCommand {
    fn parse_args(&self, args: &[String]) -> Result<HttpRequest, String> {
        let mut method: Option<String> = None;
        let mut url: Option<String> = None;
        let mut body = None;
        let mut output = None;

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-X" | "--request" => {
                    method = Some(
                        iter.next()
                            .ok_or_else(|| format!("http: -X requires a method\nusage: {}", self.usage()))?
                            .to_uppercase(),
                    );
                }
                "-d" | "--data" => {
                    body = Some(
                        iter.next()
                            .ok_or_else(|| format!("http: -d requires a body\nusage: {}", self.usage()))?
                            .clone(),
                    );
                }
                "-o" | "--output" => {
                    output = Some(
                        iter.next()
                            .ok_or_else(|| format!("http: -o requires a path\nusage: {}", self.usage()))?
                            .clone(),
                    );
                }
                other if other.starts_with('-') => {
                    return Err(format!("http: unknown option '{}'\nusage: {}", other, self.usage()));
                }
                other => {
                    if url.replace(other.to_owned()).is_some() {
                        return Err(format!("http: too many arguments\nusage: {}", self.usage()));
                    }
                }
            }
        }

        let url = url.ok_or_else(|| format!("usage: {}", self.usage()))?;
        // POST when a body is supplied without an explicit method.
        let method = method.unwrap_or_else(|| {
            if body.is_some() { "POST" } else { "GET" }.to_owned()
        });

        Ok(HttpRequest {
            method,
            url,
            body,
            output,
        })
    }
}

impl ExtensionCommand for HttpCommand {
    fn name(&self) -> &str {
        "http"
    }

    fn aliases(&self) -> &[&str] {
        &["fetch"]
    }

    fn description(&self) -> &str {
        "Perform an HTTP request from inside the sandbox"
    }

    fn usage(&self) -> &str {
        "http [-X METHOD] [-d BODY] [-o PATH] <url>"
    }

    fn execute(&self, args: &[String], context: &mut ShellContext) -> CommandOutput {
        let request = match self.parse_args(args) {
            Ok(request) => request,
            Err(message) => return CommandOutput::failure(message),
        };

        let client = match reqwest::blocking::Client::builder()
            .timeout(context.command_timeout)
            .build()
        {
            Ok(client) => client,
            Err(err) => return CommandOutput::failure(format!("http: {}", err)),
        };

        let method = match request.method.parse::<reqwest::Method>() {
            Ok(method) => method,
            Err(_) => {
                return CommandOutput::failure(format!(
                    "http: invalid method '{}'",
                    request.method
                ))
            }
        };

        let mut builder = client.request(method, &request.url);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = match builder.send() {
            Ok(response) => response,
            Err(err) => return CommandOutput::failure(format!("http: {}", err)),
        };

        let status = response.status();
        let bytes = match response.bytes() {
            Ok(bytes) => bytes,
            Err(err) => return CommandOutput::failure(format!("http: {}", err)),
        };

        log::debug!(
            "http {} {} -> {} ({} bytes)",
            request.method,
            request.url,
            status,
            bytes.len()
        );

        match request.output {
            Some(path) => {
                let target = context.resolve_path(&path);
                match context.fs.write_file(&target, &bytes) {
                    Ok(()) => CommandOutput::success(format!(
                        "{} {} bytes -> {}",
                        status.as_u16(),
                        bytes.len(),
                        target
                    )),
                    Err(err) => CommandOutput::failure(format!("http: {}", err)),
                }
            }
            None => {
                let mut output = CommandOutput::success(
                    String::from_utf8_lossy(&bytes).into_owned(),
                );
                if !status.is_success() {
                    output.stderr = format!("http: server returned {}", status);
                }
                output
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_url() {
        let command = HttpCommand;
        let request = command.parse_args(&[]);
        assert!(request.unwrap_err().contains("usage:"));
    }

    #[test]
    fn defaults_to_get() {
        let command = HttpCommand;
        let request = command
            .parse_args(&["https://example.com".to_owned()])
            .unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.url, "https://example.com");
    }

    #[test]
    fn body_implies_post() {
        let command = HttpCommand;
        let request = command
            .parse_args(&[
                "-d".to_owned(),
                "payload".to_owned(),
                "https://example.com".to_owned(),
            ])
            .unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(request.body.as_deref(), Some("payload"));
    }

    #[test]
    fn explicit_method_and_output() {
        let command = HttpCommand;
        let request = command
            .parse_args(&[
                "-X".to_owned(),
                "put".to_owned(),
                "-o".to_owned(),
                "/resp.json".to_owned(),
                "https://example.com".to_owned(),
            ])
            .unwrap();
        assert_eq!(request.method, "PUT");
        assert_eq!(request.output.as_deref(), Some("/resp.json"));
    }

    #[test]
    fn rejects_unknown_flag_and_extra_url() {
        let command = HttpCommand;
        assert!(command.parse_args(&["--bogus".to_owned()]).is_err());
        assert!(command
            .parse_args(&["a".to_owned(), "b".to_owned()])
            .is_err());
    }
}
