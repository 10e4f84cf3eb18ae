//! Basic usage example for the Pigeonhole SMTP capture server
//!
//! Starts a server on a free local port, sends it two messages over a bare
//! TCP connection and prints what was captured.

use pigeonhole::{ServerConfig, SmtpServer, StatusListener};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Pigeonhole Basic Usage Example");
    println!("==============================");

    let config = ServerConfig {
        hostname: "example.local".to_string(),
        bind_address: "127.0.0.1".parse()?,
        port: 0,
        ..ServerConfig::default()
    };

    let server = SmtpServer::new(config)?;
    server.add_status_listener(StatusListener::new(
        || println!("Server is accepting connections"),
        || println!("Server has stopped"),
    ));

    let handle = server.spawn()?;
    let addr = handle.local_addr();
    println!("Server started on {addr}");

    println!("\nSending test email...");
    send_email(
        addr,
        &[
            "From: sender@example.com",
            "To: recipient@example.com",
            "Subject: Test Email from Pigeonhole",
            "",
            "This is a test email sent to demonstrate",
            "the Pigeonhole SMTP server.",
        ],
    )?;

    if let (Some(subject), Some(body)) = (server.latest_subject(), server.latest_message()) {
        println!("\nLatest email, stored at {subject}:");
        for line in body.lines() {
            println!("    {line}");
        }
    }

    println!("\nSending second test email...");
    send_email(addr, &["Subject: Second Test Email", "", "Short and sweet."])?;

    println!("\nInbox holds {} email(s):", server.inbox().len());
    for message in server.inbox().messages() {
        println!(
            "  {} -> {} ({} bytes, subject {})",
            message.from(),
            message.to(),
            message.size(),
            message.subject()
        );
    }

    let demo_mails = server
        .inbox()
        .messages()
        .iter()
        .filter(|message| message.contains_text("Pigeonhole"))
        .count();
    println!("Emails mentioning Pigeonhole: {demo_mails}");

    handle.stop()?;
    Ok(())
}

fn send_email(addr: SocketAddr, body: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
    let mut stream = TcpStream::connect(addr)?;
    let mut reader = BufReader::new(stream.try_clone()?);

    exchange(&mut stream, &mut reader, None)?;
    exchange(&mut stream, &mut reader, Some("EHLO client.example.com"))?;
    exchange(&mut stream, &mut reader, Some("MAIL FROM:<sender@example.com>"))?;
    exchange(&mut stream, &mut reader, Some("RCPT TO:<recipient@example.com>"))?;
    exchange(&mut stream, &mut reader, Some("DATA"))?;
    for line in body {
        write!(stream, "{line}\r\n")?;
    }
    exchange(&mut stream, &mut reader, Some("."))?;
    exchange(&mut stream, &mut reader, Some("QUIT"))?;

    Ok(())
}

/// Send `line`, if any, and print the reply
fn exchange(
    stream: &mut TcpStream,
    reader: &mut BufReader<TcpStream>,
    line: Option<&str>,
) -> std::io::Result<()> {
    if let Some(line) = line {
        println!("C: {line}");
        write!(stream, "{line}\r\n")?;
    }

    // EHLO replies span several lines
    let mut response = String::new();
    loop {
        response.clear();
        reader.read_line(&mut response)?;
        print!("S: {response}");
        if response.as_bytes().get(3) != Some(&b'-') {
            return Ok(());
        }
    }
}
