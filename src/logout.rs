use url::Url;

pub(crate) fn create_logout_url(
    logout_endpoint: &Url,
    client_id: &str,
    redirect_uri: &Url,
) -> Url {
    let mut logout_url = logout_endpoint.clone();
    logout_url
        .query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri.as_str());
    logout_url
}
