/// Test fixtures: representative ensemble pages from the upstream endpoint.
///
/// The endpoint answers with an HTML fragment. The ensemble is declared in
/// the first inline `text/javascript` script as a Highcharts series list:
///
///   var hcensemblelong_data = [
///     { 'name': 'Main', 'data': [[epoch_ms, value], ...], ... },
///     { 'name': '1',    'data': [[epoch_ms, value|null], ...] },
///     ...
///   ];
///
/// The declaration is JavaScript, not JSON: single-quoted strings and a
/// trailing comma after `"enabled": false` inside marker blocks.
///
/// Timestamps below start at 2024-05-01T00:00:00Z (1714521600000) and step
/// by one hour.

/// Deterministic run plus three members over four hours. Member "2" has a
/// null at 02:00.
#[cfg(test)]
pub(crate) fn fixture_ensemble_page() -> &'static str {
    r#"<div class="ensemble-chart">
<script type="text/javascript">
    var hcensemblelong_data = [
        {
            'name': 'Main',
            'color': '#000000',
            'data': [[1714521600000, 12.5], [1714525200000, 13.0], [1714528800000, 13.5], [1714532400000, 14.0]],
            'marker': {
                                "enabled": false,
            }
        },
        {
            'name': '1',
            'data': [[1714521600000, 11.0], [1714525200000, 12.0], [1714528800000, 13.0], [1714532400000, 14.0]]
        },
        {
            'name': '2',
            'data': [[1714521600000, 10.0], [1714525200000, 11.5], [1714528800000, null], [1714532400000, 15.0]]
        },
        {
            'name': '3',
            'data': [[1714521600000, 9.0], [1714525200000, 10.0], [1714528800000, 11.0], [1714532400000, 12.0]]
        }
    ];
</script>
<script type="text/javascript">
    var unrelated = 1;
</script>
</div>"#
}

/// Members of unequal length: member "2" stops one hour early and member
/// "3" starts one hour late.
#[cfg(test)]
pub(crate) fn fixture_ragged_members_page() -> &'static str {
    r#"<script type="text/javascript">
var hcensemblelong_data = [
    {'name': '1', 'data': [[1714521600000, 1.0], [1714525200000, 2.0], [1714528800000, 3.0]]},
    {'name': '2', 'data': [[1714521600000, 4.0], [1714525200000, 5.0]]},
    {'name': '3', 'data': [[1714525200000, 7.0], [1714528800000, 8.0]]},
];
</script>"#
}

/// Script present, but the upstream had nothing for this combination and
/// the data declaration is absent.
#[cfg(test)]
pub(crate) fn fixture_page_without_marker() -> &'static str {
    r#"<div class="ensemble-chart">
<script type="text/javascript">
    var chart_options = { 'title': 'No data available' };
</script>
</div>"#
}

/// Error page with no inline script at all.
#[cfg(test)]
pub(crate) fn fixture_page_without_script() -> &'static str {
    r#"<html><body><p>This model is not available for the selected location.</p></body></html>"#
}

/// Declaration present but truncated mid-array.
#[cfg(test)]
pub(crate) fn fixture_truncated_declaration_page() -> &'static str {
    r#"<script type="text/javascript">
var hcensemblelong_data = [
    {'name': '1', 'data': [[1714521600000, 1.0], [1714525200
</script>"#
}

/// Declaration present but the series list is empty.
#[cfg(test)]
pub(crate) fn fixture_empty_declaration_page() -> &'static str {
    r#"<script type="text/javascript">
var hcensemblelong_data = [];
</script>"#
}
