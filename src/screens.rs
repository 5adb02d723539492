// Session-gated workflows behind the CLI subcommands
// Each screen makes sure a usable session exists before fetching data

use std::io::Write;

use crate::auth::token;
use crate::error::{ClientError, Result};
use crate::http_client::BookshelfHttpClient;
use crate::models::{page_count, Book, ReadBook};

/// Page size of catalog search results
pub const SEARCH_PAGE_SIZE: u32 = 10;

/// Page size of the reading list
pub const READ_LIST_PAGE_SIZE: u32 = 5;

/// Description length shown in result lists
const LIST_DESCRIPTION_CHARS: usize = 100;

fn io_err(e: std::io::Error) -> ClientError {
    ClientError::Internal(anyhow::anyhow!("Failed to write output: {}", e))
}

/// Greeting line naming the logged-in user
pub fn welcome(client: &BookshelfHttpClient) -> String {
    let who = client
        .session()
        .current_token()
        .and_then(|t| token::subject(&t))
        .unwrap_or_else(|| "(no email)".to_string());
    format!("Welcome, {}!", who)
}

/// Print who is logged in and until when
pub fn whoami(client: &BookshelfHttpClient, out: &mut impl Write) -> Result<()> {
    let Some(bearer) = client.session().current_token() else {
        writeln!(out, "Not logged in.").map_err(io_err)?;
        return Ok(());
    };

    let claims = token::decode_payload(&bearer)?;
    writeln!(out, "Email:   {}", claims.sub.as_deref().unwrap_or("-")).map_err(io_err)?;
    match token::expires_at(&bearer) {
        Some(at) => writeln!(out, "Expires: {}", at.to_rfc3339()).map_err(io_err)?,
        None => writeln!(out, "Expires: unknown").map_err(io_err)?,
    }
    let state = if client.session().inspector().is_expired(&bearer) {
        "needs refresh"
    } else {
        "valid"
    };
    writeln!(out, "Session: {}", state).map_err(io_err)?;
    Ok(())
}

/// Search the catalog and print one page of results
pub async fn search(
    client: &BookshelfHttpClient,
    query: &str,
    page: u32,
    size: u32,
    out: &mut impl Write,
) -> Result<()> {
    if query.trim().is_empty() {
        writeln!(out, "Nothing to search for.").map_err(io_err)?;
        return Ok(());
    }

    client.session().ensure_session().await?;

    let results = client.books().search(query.trim(), page, size).await?;

    writeln!(out, "{}", welcome(client)).map_err(io_err)?;
    if results.books.is_empty() {
        writeln!(out, "No books found for \"{}\".", query.trim()).map_err(io_err)?;
    }
    for book in &results.books {
        write_book_row(out, book)?;
    }
    writeln!(
        out,
        "Page {} / {}",
        page + 1,
        page_count(results.total_items, size)
    )
    .map_err(io_err)?;
    Ok(())
}

/// Show book details and whether it is already on the reading list
pub async fn show(client: &BookshelfHttpClient, id: &str, out: &mut impl Write) -> Result<()> {
    client.session().ensure_session().await?;

    let books = client.books();
    let (book, read) = futures::join!(books.get(id), books.has_read(id));
    let book = book?;
    let read = read.unwrap_or_else(|e| {
        tracing::warn!(id, error = %e, "Read status check failed");
        false
    });

    writeln!(out, "{}", book.title).map_err(io_err)?;
    writeln!(out, "Authors: {}", book.authors.as_deref().unwrap_or("-")).map_err(io_err)?;
    if let Some(ref thumbnail) = book.thumbnail {
        writeln!(out, "Cover:   {}", thumbnail).map_err(io_err)?;
    }
    writeln!(out).map_err(io_err)?;
    writeln!(out, "{}", book.description.as_deref().unwrap_or("")).map_err(io_err)?;
    writeln!(out).map_err(io_err)?;
    let status = if read {
        "Already read"
    } else {
        "Not read yet"
    };
    writeln!(out, "{}", status).map_err(io_err)?;
    Ok(())
}

/// Add a catalog book to the reading list
///
/// Returns `false` when the book was already on the list.
pub async fn add(client: &BookshelfHttpClient, id: &str, out: &mut impl Write) -> Result<bool> {
    client.session().ensure_session().await?;

    let books = client.books();
    let book = books.get(id).await?;
    if books.has_read(&book.google_book_id).await.unwrap_or(false) {
        writeln!(out, "\"{}\" is already on your reading list.", book.title).map_err(io_err)?;
        return Ok(false);
    }

    books.add(&book).await?;
    writeln!(out, "Added \"{}\" to your reading list.", book.title).map_err(io_err)?;
    Ok(true)
}

/// Print one page of the reading list
pub async fn read_list(
    client: &BookshelfHttpClient,
    page: u32,
    size: u32,
    out: &mut impl Write,
) -> Result<()> {
    client.session().ensure_session().await?;

    let data = client.books().read_page(page, size).await?;
    if data.content.is_empty() {
        writeln!(out, "Your reading list is empty.").map_err(io_err)?;
    }
    for book in &data.content {
        write_read_row(out, book)?;
    }
    writeln!(
        out,
        "Page {} / {}",
        page + 1,
        page_count(data.total_elements, size)
    )
    .map_err(io_err)?;
    Ok(())
}

/// Print the whole reading list
pub async fn read_list_all(client: &BookshelfHttpClient, out: &mut impl Write) -> Result<()> {
    client.session().ensure_session().await?;

    let books = client.books().read_all().await?;
    if books.is_empty() {
        writeln!(out, "Your reading list is empty.").map_err(io_err)?;
    }
    for book in &books {
        write_read_row(out, book)?;
    }
    writeln!(out, "{} book(s) read", books.len()).map_err(io_err)?;
    Ok(())
}

/// Remove a reading list entry by its row id
pub async fn remove(client: &BookshelfHttpClient, id: i64, out: &mut impl Write) -> Result<()> {
    client.session().ensure_session().await?;
    client.books().remove(id).await?;
    writeln!(out, "Removed entry {} from your reading list.", id).map_err(io_err)?;
    Ok(())
}

fn write_book_row(out: &mut impl Write, book: &Book) -> Result<()> {
    writeln!(
        out,
        "[{}] {} ({})\n    {}",
        book.google_book_id,
        book.title,
        book.authors.as_deref().unwrap_or("unknown author"),
        book.short_description(LIST_DESCRIPTION_CHARS)
    )
    .map_err(io_err)
}

fn write_read_row(out: &mut impl Write, book: &ReadBook) -> Result<()> {
    writeln!(
        out,
        "#{} {} ({})",
        book.id,
        book.title,
        book.authors.as_deref().unwrap_or("unknown author")
    )
    .map_err(io_err)
}
