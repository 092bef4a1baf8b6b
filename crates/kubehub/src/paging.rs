use std::future::Future;

use reconkit_core::Result;

/// Follow `continue` tokens until the server reports no further pages.
///
/// `fetch` receives the token from the previous page (`None` first) and returns
/// the page items together with the next token. An empty token ends the walk.
pub async fn drain_pages<T, F, Fut>(mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<(Vec<T>, Option<String>)>>,
{
    let mut out = Vec::new();
    let mut token: Option<String> = None;
    let mut pages = 0u32;
    loop {
        let (items, next) = fetch(token.take()).await?;
        pages += 1;
        out.extend(items);
        match next.filter(|t| !t.is_empty()) {
            Some(t) => token = Some(t),
            None => break,
        }
    }
    tracing::debug!(pages, items = out.len(), "list drained");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconkit_core::Error;

    #[tokio::test]
    async fn walks_every_page_once() {
        let data: Vec<u32> = (0..7).collect();
        let data = &data;
        let got = drain_pages(move |tok| async move {
            let start: usize = tok.map(|t| t.parse().expect("numeric token")).unwrap_or(0);
            let end = (start + 3).min(data.len());
            let next = if end < data.len() { Some(end.to_string()) } else { None };
            Ok((data[start..end].to_vec(), next))
        })
        .await
        .expect("drain");
        assert_eq!(got, (0..7).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn empty_token_terminates() {
        let got: Vec<u8> = drain_pages(|_tok| async { Ok((vec![1u8], Some(String::new()))) }).await.expect("drain");
        assert_eq!(got, vec![1]);
    }

    #[tokio::test]
    async fn page_error_aborts_walk() {
        let res: Result<Vec<u8>> = drain_pages(|tok| async move {
            match tok {
                None => Ok((vec![1u8], Some("2".to_string()))),
                Some(_) => Err(Error::Transport("410 Gone".into())),
            }
        })
        .await;
        assert!(res.is_err());
    }
}
